//! Unit tests for scopes, partner ids and the invalidation scope mapping.

use support_desk::cache::invalidation::affected_scopes;
use support_desk::models::conversation::Conversation;
use support_desk::models::scope::{PartnerId, Scope};
use support_desk::AppError;

#[test]
fn queue_keys_are_versioned() {
    assert_eq!(Scope::Global.queue_key(), "queue:v1:global");
    assert_eq!(
        Scope::partner("acme-7").expect("valid").queue_key(),
        "queue:v1:partner:acme-7"
    );
}

#[test]
fn distinct_scopes_never_share_keys() {
    let a = Scope::partner("a").expect("valid");
    let b = Scope::partner("b").expect("valid");

    assert_ne!(a.queue_key(), b.queue_key());
    assert_ne!(a.queue_key(), Scope::Global.queue_key());
}

#[test]
fn display_forms() {
    assert_eq!(Scope::Global.to_string(), "global");
    assert_eq!(Scope::partner("p_1").expect("valid").to_string(), "partner:p_1");
}

#[test]
fn malformed_partner_ids_rejected() {
    let too_long = "x".repeat(65);
    for raw in ["", "has space", "semi;colon", "slash/y", "ünïcode", too_long.as_str()] {
        let err = PartnerId::parse(raw).expect_err("must reject");
        assert!(matches!(err, AppError::InvalidScope(_)), "{raw:?} gave {err}");
    }
}

#[test]
fn partner_id_accepts_max_length() {
    let raw = "a".repeat(64);
    assert_eq!(PartnerId::parse(&raw).expect("valid").as_str(), raw);
}

#[test]
fn partner_id_deserialization_validates() {
    let ok: PartnerId = serde_json::from_str("\"acme\"").expect("valid id");
    assert_eq!(ok.as_str(), "acme");
    assert!(serde_json::from_str::<PartnerId>("\"a b\"").is_err());
}

#[test]
fn mutation_affects_global_and_partner() {
    let conversation = Conversation::new(Some("acme".into()));

    let scopes = affected_scopes(&conversation);

    assert_eq!(scopes.len(), 2);
    assert!(scopes.contains(&Scope::Global));
    assert!(scopes.contains(&Scope::partner("acme").expect("valid")));
}

#[test]
fn mutation_without_partner_affects_global_only() {
    let scopes = affected_scopes(&Conversation::new(None));
    assert_eq!(scopes.len(), 1);
    assert!(scopes.contains(&Scope::Global));
}

#[test]
fn unparsable_scope_ref_affects_global_only() {
    let scopes = affected_scopes(&Conversation::new(Some("not a partner".into())));
    assert_eq!(scopes.len(), 1);
}
