//! Integration tests for fieldseal with StaticKeyFinder.

use fieldseal::prelude::*;
use fieldseal_derive::EncryptedFields;
use fieldseal_key_static::StaticKeyFinder;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const V1: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";
const V2: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
const VC: &str = "c56a4180-65aa-42ec-a945-5fd21dec0538";

#[derive(Debug, Clone, PartialEq, Eq, EncryptedFields)]
struct Patient {
    id: u32,
    #[encrypted]
    name: String,
    #[encrypted]
    diagnosis: Option<String>,
    ward: String,
}

fn patient() -> Patient {
    Patient {
        id: 12,
        name: "Ada Lovelace".into(),
        diagnosis: Some("healthy".into()),
        ward: "B".into(),
    }
}

fn key(name: &str, version: &str, fill: u8) -> EncryptionKey {
    EncryptionKey::new(name, version).with_value_bytes(vec![fill; 32])
}

fn finder() -> Arc<StaticKeyFinder> {
    Arc::new(
        StaticKeyFinder::new()
            .with_key(key("key--acme", V1, 1))
            .with_key(key("key--acme--2024", V2, 2))
            .with_key(key("key--globex", V1, 3))
            .with_key(key("key--shared", VC, 4))
            .with_name_base("key--acme--2024", "key--acme")
            .with_tenant_key("acme", "key--acme", V1)
            .with_tenant_key("globex", "key--globex", V1)
            .with_common_key("key--shared", VC),
    )
}

fn session(finder: &Arc<StaticKeyFinder>, tenant: &str) -> KeyResolver<StaticKeyFinder> {
    KeyResolver::new(Arc::clone(finder)).for_tenant(tenant)
}

#[tokio::test]
async fn test_entity_round_trip_with_derive() {
    let finder = finder();
    let resolver = session(&finder, "acme");
    let codec = FieldCodec::new(&resolver);
    let mut record = patient();

    assert_eq!(codec.encrypt_entity(&mut record).await.expect("encrypt failed"), 2);
    assert!(record.name.starts_with(&format!("key--acme|{V1}|")));
    assert!(is_encrypted(record.diagnosis.as_deref().unwrap()));
    assert_eq!(record.ward, "B");
    assert_eq!(record.id, 12);

    assert_eq!(codec.decrypt_entity(&mut record).await.expect("decrypt failed"), 2);
    assert_eq!(record, patient());
}

#[tokio::test]
async fn test_rotated_tenant_reads_old_data() {
    let finder = finder();
    let old_session = session(&finder, "acme");
    let stored =
        FieldCodec::new(&old_session).encrypt_str("before rotation").await.unwrap().unwrap();

    // Rotate acme onto the newer key in the same family.
    let rotated = Arc::new(
        StaticKeyFinder::clone(&finder).with_tenant_key("acme", "key--acme--2024", V2),
    );
    let new_session = session(&rotated, "acme");
    let codec = FieldCodec::new(&new_session);

    assert_eq!(codec.decrypt_str(&stored).await.unwrap(), "before rotation");
    let fresh = codec.encrypt_str("after rotation").await.unwrap().unwrap();
    assert!(fresh.starts_with("key--acme--2024|"));
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let finder = finder();
    let acme = session(&finder, "acme");
    let stored = FieldCodec::new(&acme).encrypt_str("acme secret").await.unwrap().unwrap();

    let globex = session(&finder, "globex");
    let result = FieldCodec::new(&globex).decrypt_str(&stored).await;
    match result {
        Err(Error::NotAuthorized { key_name }) => assert_eq!(key_name, "key--acme"),
        other => panic!("expected NotAuthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tenant_key_name_prefix_grants_nothing() {
    let finder = Arc::new(
        StaticKeyFinder::new()
            .with_key(key("key--acme", V1, 1))
            .with_key(key("key--acmecorp", V1, 2))
            .with_tenant_key("acme", "key--acme", V1)
            .with_tenant_key("acmecorp", "key--acmecorp", V1),
    );
    let acmecorp = session(&finder, "acmecorp");
    let stored =
        FieldCodec::new(&acmecorp).encrypt_str("acmecorp secret").await.unwrap().unwrap();

    let acme = session(&finder, "acme");
    let result = FieldCodec::new(&acme).decrypt_str(&stored).await;
    match result {
        Err(Error::NotAuthorized { key_name }) => assert_eq!(key_name, "key--acmecorp"),
        other => panic!("expected NotAuthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn test_common_key_data_readable_by_every_tenant() {
    let finder = finder();
    let mut shared = session(&finder, "acme");
    shared.set_encryption_key(key("key--shared", VC, 4));
    let stored = FieldCodec::new(&shared).encrypt_str("shared catalogue").await.unwrap().unwrap();

    for tenant in ["acme", "globex"] {
        let resolver = session(&finder, tenant);
        let plain = FieldCodec::new(&resolver).decrypt_str(&stored).await.unwrap();
        assert_eq!(plain, "shared catalogue");
    }

    let strict = session(&finder, "globex").with_options(ResolverOptions {
        common_key_failover: false,
        ..ResolverOptions::default()
    });
    assert!(matches!(
        FieldCodec::new(&strict).decrypt_str(&stored).await,
        Err(Error::NotAuthorized { .. })
    ));
}

#[tokio::test]
async fn test_plaintext_passes_through() {
    let finder = finder();
    let resolver = session(&finder, "acme");
    let codec = FieldCodec::new(&resolver);

    for value in ["", "plain text", "a|b|c", "price|10|20"] {
        assert_eq!(codec.decrypt_str(value).await.unwrap(), value);
    }
}

#[tokio::test]
async fn test_blob_whole_and_streamed_agree() {
    let finder = finder();
    let resolver = session(&finder, "acme")
        .with_options(ResolverOptions::default().with_stream_buffer_size(100));
    let codec = BlobCodec::new(&resolver);
    let document: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();

    let mut blob = Vec::new();
    let metadata = codec.encrypt(&document[..], &mut blob).await.unwrap();
    let metadata = BlobMetadata::from_map(metadata.to_map()).unwrap();
    assert_eq!(metadata.unencrypted_content_length, Some(5000));

    let mut whole = Vec::new();
    assert_eq!(codec.decrypt(&blob[..], &mut whole, &metadata).await.unwrap(), 5000);

    let mut streamed = Vec::new();
    let mut stream = codec.decrypt_stream(&blob[..], &metadata).await.unwrap();
    stream.read_to_end(&mut streamed).await.unwrap();

    assert_eq!(whole, document);
    assert_eq!(streamed, document);
}

#[tokio::test]
async fn test_blob_from_other_tenant_is_refused() {
    let finder = finder();
    let acme = session(&finder, "acme");
    let mut blob = Vec::new();
    let metadata = BlobCodec::new(&acme).encrypt(&b"invoice"[..], &mut blob).await.unwrap();

    let globex = session(&finder, "globex");
    let result = BlobCodec::new(&globex).decrypt_stream(&blob[..], &metadata).await;
    assert!(matches!(result, Err(Error::NotAuthorized { .. })));
}

#[tokio::test]
async fn test_unrestricted_session_reads_any_tenant() {
    let finder = finder();
    let acme = session(&finder, "acme");
    let stored = FieldCodec::new(&acme).encrypt_str("audit me").await.unwrap().unwrap();

    let auditor = session(&finder, "globex").with_options(ResolverOptions::unrestricted());
    assert_eq!(FieldCodec::new(&auditor).decrypt_str(&stored).await.unwrap(), "audit me");
}
