//! Authentication, transport and browser hardening rules.
//!
//! Every rule here is a per-option rule: a setting shared by the whole
//! cluster yields one finding, disagreeing members yield one each.

use serde_json::{json, Value};

use crate::advice::Advice;
use crate::engine::{enterprise_only, for_config_option, AdvisorConfig, Rule};
use crate::error::AdviceError;
use crate::rules::{flag, integer, seconds, setting};
use crate::snapshot::DiagnosticSnapshot;

/// Auth switch.
pub const AUTH_ENABLED: &str = "dbms.security.auth_enabled";
/// Lockout after failed logins.
pub const AUTH_LOCK_TIME: &str = "dbms.security.auth_lock_time";
/// Failed logins before lockout.
pub const AUTH_MAX_FAILED: &str = "dbms.security.auth_max_failed_attempts";
/// Bolt transport encryption.
pub const BOLT_TLS_LEVEL: &str = "bolt.tls_level";
/// CORS allow-origin header.
pub const CORS_ORIGIN: &str = "dbms.security.http_access_control_allow_origin";
/// HSTS header.
pub const HSTS: &str = "dbms.security.http_strict_transport_security";
/// Authentication provider.
pub const AUTH_PROVIDER: &str = "dbms.security.auth_provider";
/// Browser keeps credentials between sessions.
pub const BROWSER_RETAIN: &str = "browser.retain_connection_credentials";
/// Browser credential lifetime.
pub const BROWSER_TIMEOUT: &str = "browser.credential_timeout";

const LOCK_TIME_RANGE: (f64, f64) = (3.0, 10.0);
const MAX_FAILED_RANGE: (i64, i64) = (3, 10);

/// Security rules in evaluation order.
pub fn rules() -> Vec<Rule> {
    vec![
        Rule::always("auth-enabled", auth_enabled),
        Rule::always("auth-lock-time", auth_lock_time),
        Rule::always("auth-max-failed-attempts", auth_max_failed_attempts),
        Rule::always("bolt-tls-required", bolt_tls_required),
        Rule::always("cors-origin", cors_origin),
        Rule::always("hsts-header", hsts_header),
        Rule::when("ldap-provider", enterprise_only, ldap_provider),
        Rule::always("browser-retain-credentials", browser_retain_credentials),
        Rule::always("browser-credential-timeout", browser_credential_timeout),
    ]
}

fn evidence(key: &str, value: Option<&Value>) -> Value {
    json!({ "setting": key, "value": value })
}

/// Authentication must be on.
pub fn auth_enabled(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, AUTH_ENABLED, |addr, value, _| {
        let advice = match flag(value) {
            Some(false) => Advice::error(
                addr,
                "Authentication is disabled",
                format!("Set {}=true; anyone who can reach the server can read and write data", AUTH_ENABLED),
            )?,
            Some(true) => Advice::pass(addr, "Authentication is enabled")?,
            None => Advice::pass(addr, "Authentication is enabled by default")?,
        };
        Ok(advice.with_evidence(evidence(AUTH_ENABLED, value)))
    })
}

/// Lockout after failed logins should last between 3 and 10 seconds.
pub fn auth_lock_time(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, AUTH_LOCK_TIME, |addr, value, _| {
        let (low, high) = LOCK_TIME_RANGE;
        let advice = match seconds(value) {
            None if value.is_none() => Advice::pass(addr, "Login lockout time is at its default (5s)")?,
            None => Advice::warn(
                addr,
                format!(
                    "Login lockout time {} could not be read",
                    setting(value).unwrap_or_default()
                ),
                format!("Set {} to a duration such as 5s", AUTH_LOCK_TIME),
            )?,
            Some(secs) if secs < low => Advice::warn(
                addr,
                format!("Login lockout time of {}s is very short", secs),
                format!("Raise {} to at least {}s to slow brute-force attempts", AUTH_LOCK_TIME, low),
            )?,
            Some(secs) if secs > high => Advice::warn(
                addr,
                format!("Login lockout time of {}s is long", secs),
                format!("Lower {} to at most {}s so legitimate users are not locked out", AUTH_LOCK_TIME, high),
            )?,
            Some(secs) => Advice::pass(addr, format!("Login lockout time of {}s is reasonable", secs))?,
        };
        Ok(advice.with_evidence(evidence(AUTH_LOCK_TIME, value)))
    })
}

/// Failed login attempts before lockout should be between 3 and 10.
pub fn auth_max_failed_attempts(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, AUTH_MAX_FAILED, |addr, value, _| {
        let (low, high) = MAX_FAILED_RANGE;
        let advice = match integer(value) {
            None => Advice::pass(addr, "Failed login attempts before lockout at its default (3)")?,
            Some(0) => Advice::error(
                addr,
                "Login lockout is disabled",
                format!("Set {} between {} and {}", AUTH_MAX_FAILED, low, high),
            )?,
            Some(n) if n < low || n > high => Advice::warn(
                addr,
                format!("{} failed login attempts are allowed before lockout", n),
                format!("Set {} between {} and {}", AUTH_MAX_FAILED, low, high),
            )?,
            Some(n) => Advice::pass(addr, format!("{} failed login attempts before lockout", n))?,
        };
        Ok(advice.with_evidence(evidence(AUTH_MAX_FAILED, value)))
    })
}

/// Bolt connections should require TLS.
pub fn bolt_tls_required(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, BOLT_TLS_LEVEL, |addr, value, _| {
        let level = setting(value)
            .unwrap_or_else(|| "OPTIONAL".to_string())
            .to_ascii_uppercase();
        let advice = match level.as_str() {
            "REQUIRED" => Advice::pass(addr, "Bolt connections require TLS")?,
            "DISABLED" => Advice::error(
                addr,
                "TLS is disabled for Bolt connections",
                format!("Set {}=REQUIRED and install certificates", BOLT_TLS_LEVEL),
            )?,
            other => Advice::warn(
                addr,
                format!("Bolt TLS level is {}; clients may connect unencrypted", other),
                format!("Set {}=REQUIRED", BOLT_TLS_LEVEL),
            )?,
        };
        Ok(advice.with_evidence(evidence(BOLT_TLS_LEVEL, value)))
    })
}

/// The HTTP endpoint should not allow every origin.
pub fn cors_origin(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, CORS_ORIGIN, |addr, value, _| {
        let advice = match setting(value).as_deref() {
            None | Some("*") => Advice::warn(
                addr,
                "HTTP endpoint accepts requests from any origin",
                format!("Set {} to the origins that need access", CORS_ORIGIN),
            )?,
            Some(origin) => Advice::pass(addr, format!("CORS restricted to {}", origin))?,
        };
        Ok(advice.with_evidence(evidence(CORS_ORIGIN, value)))
    })
}

/// An HSTS header should be configured.
pub fn hsts_header(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, HSTS, |addr, value, _| {
        let advice = match setting(value) {
            Some(header) if !header.is_empty() => {
                Advice::pass(addr, format!("HSTS header configured: {}", header))?
            }
            _ => Advice::info(addr, "No HSTS header is configured")?.with_advice(format!(
                "When serving HTTPS, set {} (for example max-age=31536000; includeSubDomains)",
                HSTS
            )),
        };
        Ok(advice.with_evidence(evidence(HSTS, value)))
    })
}

/// Reports whether LDAP backs authentication.
pub fn ldap_provider(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, AUTH_PROVIDER, |addr, value, _| {
        let provider = setting(value).unwrap_or_else(|| "native".to_string());
        let advice = if provider.eq_ignore_ascii_case("ldap") {
            Advice::pass(addr, "Authentication is backed by LDAP")?
        } else {
            Advice::info(addr, format!("Authentication provider is {}", provider))?
                .with_advice("Consider LDAP to manage users centrally")
        };
        Ok(advice.with_evidence(evidence(AUTH_PROVIDER, value)))
    })
}

/// Browser sessions should not retain credentials.
pub fn browser_retain_credentials(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, BROWSER_RETAIN, |addr, value, _| {
        let advice = if flag(value).unwrap_or(true) {
            Advice::warn(
                addr,
                "Browser retains connection credentials between sessions",
                format!("Set {}=false on shared workstations", BROWSER_RETAIN),
            )?
        } else {
            Advice::pass(addr, "Browser does not retain credentials")?
        };
        Ok(advice.with_evidence(evidence(BROWSER_RETAIN, value)))
    })
}

/// Browser credentials should expire.
pub fn browser_credential_timeout(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, BROWSER_TIMEOUT, |addr, value, _| {
        let advice = match seconds(value) {
            Some(secs) if secs > 0.0 => {
                Advice::pass(addr, format!("Browser credentials expire after {}s", secs))?
            }
            _ => Advice::info(addr, "Browser credentials never expire")?
                .with_advice(format!("Set {} to a duration such as 30m", BROWSER_TIMEOUT)),
        };
        Ok(advice.with_evidence(evidence(BROWSER_TIMEOUT, value)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{Level, OVERALL};
    use crate::rules::fixtures::{cores, member, snapshot, with_config};
    use crate::snapshot::ClusterRole;

    fn cfg() -> AdvisorConfig {
        AdvisorConfig::default()
    }

    fn uniform(key: &str, value: Value) -> DiagnosticSnapshot {
        snapshot(
            cores(3)
                .into_iter()
                .map(|n| with_config(n, key, value.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_auth_disabled_is_one_overall_error() {
        let out = auth_enabled(&uniform(AUTH_ENABLED, json!("false")), &cfg()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr, OVERALL);
        assert_eq!(out[0].level, Level::Error);
    }

    #[test]
    fn test_auth_disagreement_reports_each_member() {
        let nodes = vec![
            with_config(member("a", ClusterRole::Leader), AUTH_ENABLED, json!("true")),
            with_config(member("b", ClusterRole::Follower), AUTH_ENABLED, json!("false")),
        ];
        let out = auth_enabled(&snapshot(nodes), &cfg()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].addr.as_str(), out[0].level), ("a", Level::Pass));
        assert_eq!((out[1].addr.as_str(), out[1].level), ("b", Level::Error));
    }

    #[test]
    fn test_lock_time_bounds() {
        let levels: Vec<Level> = ["1s", "3s", "10s", "30s", "soon"]
            .iter()
            .map(|v| auth_lock_time(&uniform(AUTH_LOCK_TIME, json!(v)), &cfg()).unwrap()[0].level)
            .collect();
        assert_eq!(
            levels,
            vec![Level::Warn, Level::Pass, Level::Pass, Level::Warn, Level::Warn]
        );
        let unset = auth_lock_time(&snapshot(cores(1)), &cfg()).unwrap();
        assert_eq!(unset[0].level, Level::Pass);
    }

    #[test]
    fn test_max_failed_attempts_bounds() {
        let levels: Vec<Level> = ["0", "2", "3", "10", "11"]
            .iter()
            .map(|v| {
                auth_max_failed_attempts(&uniform(AUTH_MAX_FAILED, json!(v)), &cfg()).unwrap()[0]
                    .level
            })
            .collect();
        assert_eq!(
            levels,
            vec![Level::Error, Level::Warn, Level::Pass, Level::Pass, Level::Warn]
        );
    }

    #[test]
    fn test_bolt_tls_levels() {
        let required = bolt_tls_required(&uniform(BOLT_TLS_LEVEL, json!("REQUIRED")), &cfg());
        assert_eq!(required.unwrap()[0].level, Level::Pass);
        let disabled = bolt_tls_required(&uniform(BOLT_TLS_LEVEL, json!("DISABLED")), &cfg());
        assert_eq!(disabled.unwrap()[0].level, Level::Error);
        let unset = bolt_tls_required(&snapshot(cores(3)), &cfg()).unwrap();
        assert_eq!(unset[0].level, Level::Warn);
    }

    #[test]
    fn test_cors_and_hsts() {
        let open = cors_origin(&uniform(CORS_ORIGIN, json!("*")), &cfg()).unwrap();
        assert_eq!(open[0].level, Level::Warn);
        let restricted =
            cors_origin(&uniform(CORS_ORIGIN, json!("https://ops.example.com")), &cfg()).unwrap();
        assert_eq!(restricted[0].level, Level::Pass);

        let none = hsts_header(&snapshot(cores(2)), &cfg()).unwrap();
        assert_eq!(none[0].level, Level::Info);
        let set = hsts_header(&uniform(HSTS, json!("max-age=31536000")), &cfg()).unwrap();
        assert_eq!(set[0].level, Level::Pass);
    }

    #[test]
    fn test_ldap_and_browser_settings() {
        let ldap = ldap_provider(&uniform(AUTH_PROVIDER, json!("ldap")), &cfg()).unwrap();
        assert_eq!(ldap[0].level, Level::Pass);
        let native = ldap_provider(&snapshot(cores(3)), &cfg()).unwrap();
        assert_eq!(native[0].level, Level::Info);

        let retain = browser_retain_credentials(&snapshot(cores(1)), &cfg()).unwrap();
        assert_eq!(retain[0].level, Level::Warn);
        let forget =
            browser_retain_credentials(&uniform(BROWSER_RETAIN, json!(false)), &cfg()).unwrap();
        assert_eq!(forget[0].level, Level::Pass);

        let never = browser_credential_timeout(&uniform(BROWSER_TIMEOUT, json!("0")), &cfg());
        assert_eq!(never.unwrap()[0].level, Level::Info);
        let expires = browser_credential_timeout(&uniform(BROWSER_TIMEOUT, json!("30m")), &cfg());
        assert_eq!(expires.unwrap()[0].level, Level::Pass);
    }
}
