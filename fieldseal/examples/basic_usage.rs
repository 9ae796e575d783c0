//! Basic usage example for `fieldseal`.

use fieldseal::prelude::*;
use fieldseal_key_static::StaticKeyFinder;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const VERSION: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("fieldseal Basic Usage Example");
    println!("=============================\n");

    // One key for the default tenant
    let key = EncryptionKey::new("key--example", VERSION)
        .with_value("AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=");
    let finder = Arc::new(StaticKeyFinder::single(key));
    let resolver = KeyResolver::new(finder);
    println!("✓ Resolver created\n");

    // Field encryption
    let codec = FieldCodec::new(&resolver);
    let stored = codec.encrypt_str("alice@example.com").await?.ok_or("key not ready")?;
    println!("Stored value: {stored}");

    let header = FieldHeader::parse(&stored).ok_or("missing header")?;
    println!("  - Key name: {}", header.key_name());
    println!("  - Key version: {}", header.key_version());

    let email = codec.decrypt_str(&stored).await?;
    println!("✓ Decrypted: {email}\n");
    assert_eq!(email, "alice@example.com");

    // Plaintext is passed through unchanged
    assert_eq!(codec.decrypt_str("not encrypted").await?, "not encrypted");
    println!("✓ Plaintext passes through\n");

    // Blob encryption
    let document = b"quarterly report, page 1 of 1".repeat(100);
    let blob_codec = BlobCodec::new(&resolver);
    let mut blob = Vec::new();
    let metadata = blob_codec.encrypt(&document[..], &mut blob).await?;
    println!("✓ Blob encrypted ({} bytes)", blob.len());
    for (name, value) in metadata.to_map() {
        println!("  - {name}: {value}");
    }

    let mut plaintext = Vec::new();
    let mut stream = blob_codec.decrypt_stream(&blob[..], &metadata).await?;
    stream.read_to_end(&mut plaintext).await?;
    assert_eq!(plaintext, document);
    println!("✓ Blob decrypted and verified ({} bytes)", plaintext.len());

    Ok(())
}
