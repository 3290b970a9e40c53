use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use lockstream::header::{Header, HEADER_LEN};
use lockstream::sizing::plaintext_size;
use lockstream::{CipherRegistry, Credential, LockError, StreamCipherPipeline, StreamSession};

/// Writes `data` to a plaintext file and encrypts it with `password`.
async fn make_container(
    tmp: &TempDir,
    name: &str,
    data: &[u8],
    password: &str,
) -> Result<PathBuf> {
    let src = tmp.path().join(format!("{name}.src"));
    let dst = tmp.path().join(name);
    fs::write(&src, data)?;

    StreamCipherPipeline::default()
        .encrypt(&src, &dst, &Credential::from(password), &StreamSession::new())
        .await?;
    Ok(dst)
}

async fn decrypt_with(registry: &CipherRegistry, path: &PathBuf) -> Result<Vec<u8>> {
    let resolution = registry.require(path).await?;
    let mut out = Vec::new();
    StreamCipherPipeline::new(4096)
        .decrypt_to_sink(path, &mut out, Some(&resolution.key), &StreamSession::new())
        .await?;
    Ok(out)
}

#[tokio::test]
async fn round_trip_at_block_boundaries() -> Result<()> {
    let tmp = TempDir::new()?;
    let registry = CipherRegistry::new();
    registry.register("boundary");

    for len in [0usize, 15, 16, 17, 64 * 1024 * 2 + 5] {
        let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
        let path = make_container(&tmp, &format!("len{len}.lock"), &data, "boundary").await?;

        let raw = fs::read(&path)?;
        assert_eq!((raw.len() - HEADER_LEN) % 16, 0, "ciphertext must be block aligned");

        let out = decrypt_with(&registry, &path).await?;
        assert_eq!(out, data, "length {len}");
    }
    Ok(())
}

#[tokio::test]
async fn empty_file_makes_57_byte_container() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = make_container(&tmp, "empty.lock", b"", "pw").await?;

    let raw = fs::read(&path)?;
    assert_eq!(raw.len(), 57);
    let header = Header::from_bytes(&raw, "empty.lock")?;
    assert_eq!(header.padding_marker, 0);

    let registry = CipherRegistry::new();
    registry.register("pw");
    assert!(decrypt_with(&registry, &path).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn aligned_file_gets_extra_pad_block() -> Result<()> {
    let tmp = TempDir::new()?;
    let data = [0xAAu8; 16];
    let path = make_container(&tmp, "aa.lock", &data, "pw").await?;

    assert_eq!(fs::metadata(&path)?.len(), 73);

    let registry = CipherRegistry::new();
    registry.register("pw");
    assert_eq!(decrypt_with(&registry, &path).await?, data);
    Ok(())
}

#[tokio::test]
async fn wrong_password_does_not_resolve() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = make_container(&tmp, "secret.lock", b"top secret", "right").await?;

    let registry = CipherRegistry::new();
    registry.register("wrong");
    registry.register("also wrong");
    assert!(registry.resolve(&path).await.is_none());

    let mut sink = Vec::new();
    let err = StreamCipherPipeline::default()
        .decrypt_to_sink(&path, &mut sink, None, &StreamSession::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::InvalidPassword(_)));
    Ok(())
}

#[tokio::test]
async fn registry_prefers_first_registered() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = make_container(&tmp, "shared.lock", b"either opens me", "same").await?;

    let registry = CipherRegistry::new();
    assert_eq!(registry.register("same"), 0);
    assert_eq!(registry.register("same"), 1);

    for _ in 0..2 {
        let hit = registry.resolve(&path).await.expect("should resolve");
        assert_eq!(hit.index, 0);
    }
    Ok(())
}

#[tokio::test]
async fn size_estimate_matches_emitted_bytes() -> Result<()> {
    let tmp = TempDir::new()?;
    let registry = CipherRegistry::new();
    registry.register("size");

    for len in [1usize, 33, 1000, 70_001] {
        let data = vec![7u8; len];
        let path = make_container(&tmp, &format!("s{len}.lock"), &data, "size").await?;

        let raw = fs::read(&path)?;
        let header = Header::from_bytes(&raw, "s")?;
        let estimate = plaintext_size(raw.len() as u64, header.padding_marker);

        let resolution = registry.resolve(&path).await.expect("should resolve");
        assert_eq!(Some(resolution.plaintext_size), estimate);

        let session = StreamSession::new();
        let mut out = Vec::new();
        let emitted = StreamCipherPipeline::new(1024)
            .decrypt_to_sink(&path, &mut out, Some(&resolution.key), &session)
            .await?;
        assert_eq!(emitted, resolution.plaintext_size);
        assert_eq!(out.len() as u64, resolution.plaintext_size);
        assert_eq!(session.expected_size(), resolution.plaintext_size);
        assert!(session.is_complete());
    }
    Ok(())
}

#[tokio::test]
async fn decrypt_to_file_writes_plaintext() -> Result<()> {
    let tmp = TempDir::new()?;
    let data = b"decrypted onto disk".to_vec();
    let path = make_container(&tmp, "disk.lock", &data, "pw").await?;

    let registry = CipherRegistry::new();
    registry.register("pw");
    let resolution = registry.require(&path).await?;

    let out_path = tmp.path().join("disk.out");
    let n = StreamCipherPipeline::default()
        .decrypt_to_file(&path, &out_path, Some(&resolution.key), &StreamSession::new())
        .await?;
    assert_eq!(n, data.len() as u64);
    assert_eq!(fs::read(&out_path)?, data);
    Ok(())
}

#[tokio::test]
async fn truncated_container_fails_mid_stream() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = make_container(&tmp, "cut.lock", &[1u8; 100], "pw").await?;

    let registry = CipherRegistry::new();
    registry.register("pw");
    let resolution = registry.require(&path).await?;

    // Drop 5 bytes so the ciphertext no longer ends on a block boundary.
    let raw = fs::read(&path)?;
    fs::write(&path, &raw[..raw.len() - 5])?;

    let mut out = Vec::new();
    let err = StreamCipherPipeline::default()
        .decrypt_to_sink(&path, &mut out, Some(&resolution.key), &StreamSession::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Crypto(_)));
    Ok(())
}

#[tokio::test]
async fn concurrent_resolution_while_registering() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = make_container(&tmp, "busy.lock", b"shared registry", "late").await?;

    let registry = std::sync::Arc::new(CipherRegistry::new());
    registry.register("early");

    let mut handles = Vec::new();
    for _ in 0..3 {
        let registry = registry.clone();
        let path = path.clone();
        handles.push(tokio::spawn(async move { registry.resolve(&path).await }));
    }
    let late = registry.register("late");

    for handle in handles {
        if let Some(hit) = handle.await? {
            assert_eq!(hit.index, late);
        }
    }
    let hit = registry.resolve(&path).await.expect("should resolve");
    assert_eq!(hit.index, late);
    Ok(())
}

#[tokio::test]
async fn non_utf8_credentials_are_rejected() -> Result<()> {
    #[cfg(unix)]
    {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let err = Credential::from_os_str(OsStr::from_bytes(&[0xC3, 0x28])).unwrap_err();
        assert!(matches!(err, LockError::InvalidPasswordType(_)));
    }
    Ok(())
}
