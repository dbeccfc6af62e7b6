//! Engines built from configuration files

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use stepgate_auth::{
    Assertion, Authentication, AuthenticationContextValidationResult as Outcome, Decision, Engine,
    Principal, ProviderRegistry, RequestContext, Service,
};
use stepgate_common::Config;

fn sample_config() -> Config {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../stepgate.toml");
    Config::load(path).unwrap()
}

fn staff() -> Authentication {
    Authentication::new(
        Principal::new("casuser").with_attribute("memberOf", vec!["staff".to_string()]),
    )
}

fn check(
    engine: &Engine,
    service: &str,
    auth: Authentication,
    request: &RequestContext,
) -> Outcome {
    let assertion = Assertion::new(Service::new(service), Arc::new(auth));
    engine.validate_assertion(&assertion, request).unwrap()
}

#[test]
fn test_sample_config_loads() {
    let engine = Engine::from_config(&sample_config()).unwrap();
    let ids: Vec<_> = engine
        .registry()
        .providers()
        .iter()
        .map(|p| p.id().to_string())
        .collect();
    assert_eq!(ids, vec!["mfa-duo", "mfa-gauth"]);
    assert_eq!(engine.services().len(), 2);
}

#[test]
fn test_sample_portal_requires_duo() {
    let engine = Engine::from_config(&sample_config()).unwrap();
    let external = RequestContext::new().with_client_ip("203.0.113.10".parse().unwrap());

    assert_eq!(
        check(&engine, "https://portal.example.org/a", staff(), &external),
        Outcome::denied()
    );
    assert_eq!(
        check(
            &engine,
            "https://portal.example.org/a",
            staff().with_satisfied_context("duo"),
            &external
        ),
        Outcome::satisfied("mfa-duo")
    );

    let local = RequestContext::new().with_client_ip("127.0.0.1".parse().unwrap());
    assert_eq!(
        check(&engine, "https://portal.example.org/a", staff(), &local),
        Outcome::success()
    );
    assert_eq!(engine.metrics().decisions(Decision::Bypassed), 1);
}

#[test]
fn test_sample_portal_cannot_be_downgraded_by_request() {
    let engine = Engine::from_config(&sample_config()).unwrap();
    let request = RequestContext::new()
        .with_parameter("authn_method", "mfa-gauth")
        .with_client_ip("203.0.113.10".parse().unwrap());

    assert_eq!(
        check(
            &engine,
            "https://portal.example.org/a",
            staff().with_satisfied_context("mfa-gauth"),
            &request
        ),
        Outcome::denied()
    );
}

#[test]
fn test_sample_wiki_policy() {
    let engine = Engine::from_config(&sample_config()).unwrap();
    let request = RequestContext::new();

    let student = Authentication::new(
        Principal::new("student").with_attribute("memberOf", vec!["students".to_string()]),
    );
    assert_eq!(
        check(&engine, "https://wiki.example.org/x", student, &request),
        Outcome::success()
    );
    assert_eq!(
        check(&engine, "https://wiki.example.org/x", staff(), &request),
        Outcome::denied()
    );

    // a satisfied higher-ranked provider covers the lower-ranked requirement
    assert_eq!(
        check(
            &engine,
            "https://wiki.example.org/x",
            staff().with_satisfied_context("mfa-duo"),
            &request
        ),
        Outcome::satisfied("mfa-duo")
    );

    engine.set_provider_available("mfa-gauth", false);
    assert_eq!(
        check(&engine, "https://wiki.example.org/x", staff(), &request),
        Outcome::success()
    );
}

#[test]
fn test_engine_from_temp_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[engine]
global_failure_mode = "OPEN"

[engine.triggers]
global_provider_id = "mfa-simple"

[[providers]]
id = "mfa-simple"
available = false
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    let engine = Engine::from_config(&config).unwrap();
    let auth = Authentication::new(Principal::new("casuser"));
    assert_eq!(
        check(&engine, "https://any", auth, &RequestContext::new()),
        Outcome::success()
    );
    assert_eq!(engine.metrics().decisions(Decision::FailureModeExcused), 1);
}
