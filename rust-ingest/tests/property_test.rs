//! Property-based tests for the signature and dedup invariants.

use std::time::Duration;

use hookgate::{signature, DedupOutcome, MemoryDedupStore};
use proptest::prelude::*;
use tokio::time::Instant;

fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(64);

    ProptestConfig::with_cases(cases)
}

proptest! {
    #![proptest_config(proptest_config())]

    /// A body signed with a secret always verifies under that secret.
    #[test]
    fn signed_body_always_verifies(
        body in prop::collection::vec(any::<u8>(), 0..2048),
        secret in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        let sig = signature::sign(&body, &secret);
        prop_assert!(signature::verify(&body, sig.as_bytes(), &secret));
    }

    /// Flipping any single body byte breaks the signature.
    #[test]
    fn any_body_change_fails_verification(
        body in prop::collection::vec(any::<u8>(), 1..512),
        secret in prop::collection::vec(any::<u8>(), 1..64),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let sig = signature::sign(&body, &secret);
        let mut tampered = body.clone();
        let i = index.index(tampered.len());
        tampered[i] ^= flip;

        prop_assert!(!signature::verify(&tampered, sig.as_bytes(), &secret));
    }

    /// Arbitrary header garbage never verifies.
    #[test]
    fn arbitrary_signature_bytes_rejected(
        body in prop::collection::vec(any::<u8>(), 0..256),
        garbage in prop::collection::vec(any::<u8>(), 0..80),
    ) {
        let secret = b"fixed-secret";
        let genuine = signature::sign(&body, secret);
        prop_assume!(garbage != genuine.as_bytes());
        prop_assume!(garbage != genuine.trim_start_matches("sha256=").as_bytes());

        prop_assert!(!signature::verify(&body, &garbage, secret));
    }

    /// Within the window an id is fresh exactly once; after it, fresh again.
    #[test]
    fn dedup_window_semantics(
        id in "[a-zA-Z0-9-]{1,64}",
        retention_secs in 1u64..100_000,
        probes in prop::collection::vec(0u64..100_000, 1..20),
    ) {
        let retention = Duration::from_secs(retention_secs);
        let store = MemoryDedupStore::new(retention);
        let start = Instant::now();

        prop_assert_eq!(store.check_and_record_at(&id, start), DedupOutcome::Fresh);

        let mut probes = probes;
        probes.sort_unstable();
        for offset in probes.into_iter().filter(|o| *o < retention_secs) {
            let outcome = store.check_and_record_at(&id, start + Duration::from_secs(offset));
            prop_assert_eq!(outcome, DedupOutcome::Duplicate);
        }

        prop_assert_eq!(
            store.check_and_record_at(&id, start + retention),
            DedupOutcome::Fresh
        );
    }
}
