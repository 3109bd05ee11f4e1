use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn bin(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("vaultkit"));
    cmd.current_dir(dir)
        .env_remove("VAULTKIT_PASSWORD")
        .env_remove("VAULTKIT_KEY")
        .env_remove("VAULTKIT_KDF_ITERATIONS")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).unwrap()
}

#[test]
fn gen_key_prints_key_of_requested_size() {
    let dir = tempdir().unwrap();

    let key = stdout_of(bin(dir.path()).arg("gen-key").arg("--bits").arg("192"));

    let decoded = vaultkit::encoding::decode(key.trim()).unwrap();
    assert_eq!(decoded.len(), 24);
}

#[test]
fn rejects_unsupported_key_size() {
    let dir = tempdir().unwrap();

    bin(dir.path())
        .arg("gen-key")
        .arg("--bits")
        .arg("512")
        .assert()
        .failure()
        .stderr(predicate::str::contains("128, 192 or 256"));
}

#[test]
fn text_roundtrip_with_password() {
    let dir = tempdir().unwrap();

    let envelope = stdout_of(
        bin(dir.path())
            .env("VAULTKIT_PASSWORD", "pw")
            .arg("encrypt-text")
            .arg("top secret"),
    );

    bin(dir.path())
        .env("VAULTKIT_PASSWORD", "pw")
        .arg("decrypt-text")
        .arg(envelope.trim())
        .assert()
        .success()
        .stdout("top secret\n");
}

#[test]
fn wrong_password_fails_authentication() {
    let dir = tempdir().unwrap();

    let envelope = stdout_of(
        bin(dir.path())
            .env("VAULTKIT_PASSWORD", "pw")
            .arg("encrypt-text")
            .arg("top secret"),
    );

    bin(dir.path())
        .env("VAULTKIT_PASSWORD", "not-pw")
        .arg("decrypt-text")
        .arg(envelope.trim())
        .assert()
        .failure()
        .stderr(predicate::str::contains("authentication failed"))
        .stdout(predicate::str::contains("top secret").not());
}

#[test]
fn password_can_be_piped() {
    let dir = tempdir().unwrap();

    let envelope = stdout_of(
        bin(dir.path())
            .arg("--kdf-iterations")
            .arg("500")
            .arg("encrypt-text")
            .arg("piped")
            .write_stdin("pw\npw\n"),
    );

    bin(dir.path())
        .arg("--kdf-iterations")
        .arg("500")
        .arg("decrypt-text")
        .arg(envelope.trim())
        .write_stdin("pw\n")
        .assert()
        .success()
        .stdout("piped\n");
}

#[test]
fn mismatched_piped_passwords_are_rejected() {
    let dir = tempdir().unwrap();

    bin(dir.path())
        .arg("encrypt-text")
        .arg("x")
        .write_stdin("one\ntwo\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("passwords do not match"));
}

#[test]
fn text_roundtrip_with_raw_key() {
    let dir = tempdir().unwrap();
    let key = stdout_of(bin(dir.path()).arg("gen-key").arg("--bits").arg("128"));

    let envelope = stdout_of(
        bin(dir.path())
            .env("VAULTKIT_KEY", key.trim())
            .arg("encrypt-text")
            .arg("--bits")
            .arg("128")
            .arg("raw"),
    );

    bin(dir.path())
        .arg("decrypt-text")
        .arg("--bits")
        .arg("128")
        .arg("--key")
        .arg(key.trim())
        .arg(envelope.trim())
        .assert()
        .success()
        .stdout("raw\n");
}

#[test]
fn infer_key_treats_key_shaped_password_as_raw_key() {
    let dir = tempdir().unwrap();
    let key = stdout_of(bin(dir.path()).arg("gen-key"));

    let envelope = stdout_of(
        bin(dir.path())
            .arg("encrypt-text")
            .arg("--key")
            .arg(key.trim())
            .arg("legacy"),
    );

    bin(dir.path())
        .env("VAULTKIT_PASSWORD", key.trim())
        .arg("decrypt-text")
        .arg("--infer-key")
        .arg(envelope.trim())
        .assert()
        .success()
        .stdout("legacy\n");
}

#[test]
fn file_roundtrip_with_password_and_salt() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("data.bin");
    let sealed = dir.path().join("data.enc");
    let restored = dir.path().join("data.out");
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&plain, &data).unwrap();

    let out = stdout_of(
        bin(dir.path())
            .env("VAULTKIT_PASSWORD", "file-pw")
            .arg("encrypt-file")
            .arg(&plain)
            .arg(&sealed),
    );
    let salt = out
        .lines()
        .find_map(|l| l.strip_prefix("salt: "))
        .unwrap()
        .to_owned();

    assert_eq!(
        std::fs::metadata(&sealed).unwrap().len(),
        data.len() as u64 + 12 + 16
    );

    bin(dir.path())
        .env("VAULTKIT_PASSWORD", "file-pw")
        .arg("decrypt-file")
        .arg(&sealed)
        .arg(&restored)
        .arg("--salt")
        .arg(&salt)
        .assert()
        .success()
        .stdout(predicate::str::contains("decrypted 100000 bytes"));

    assert_eq!(std::fs::read(&restored).unwrap(), data);
}

#[test]
fn password_file_decryption_requires_salt() {
    let dir = tempdir().unwrap();
    let sealed = dir.path().join("x.enc");
    std::fs::write(&sealed, [0u8; 40]).unwrap();

    bin(dir.path())
        .env("VAULTKIT_PASSWORD", "pw")
        .arg("decrypt-file")
        .arg(&sealed)
        .arg(dir.path().join("x.out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--salt is required"));
}

#[test]
fn tampered_file_produces_no_output() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("a.txt");
    let sealed = dir.path().join("a.enc");
    let restored = dir.path().join("a.out");
    std::fs::write(&plain, b"do not alter").unwrap();

    let key = stdout_of(bin(dir.path()).arg("gen-key"));
    bin(dir.path())
        .env("VAULTKIT_KEY", key.trim())
        .arg("encrypt-file")
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success()
        .stdout(predicate::str::contains("salt: ").not());

    let mut bytes = std::fs::read(&sealed).unwrap();
    bytes[14] ^= 1;
    std::fs::write(&sealed, bytes).unwrap();

    bin(dir.path())
        .env("VAULTKIT_KEY", key.trim())
        .arg("decrypt-file")
        .arg(&sealed)
        .arg(&restored)
        .assert()
        .failure()
        .stderr(predicate::str::contains("authentication failed"));

    assert!(!restored.exists());
}

#[test]
fn rsa_keygen_encrypt_decrypt() {
    let dir = tempdir().unwrap();
    let keys = dir.path().join("keys");

    bin(dir.path())
        .arg("rsa-keygen")
        .arg("--bits")
        .arg("1024")
        .arg("--out-dir")
        .arg(&keys)
        .assert()
        .success()
        .stdout(predicate::str::contains("RSA-1024"));

    let public = std::fs::read_to_string(keys.join("public.pem")).unwrap();
    assert!(public.starts_with("-----BEGIN PUBLIC KEY-----\n"));
    assert!(public.lines().all(|l| l.len() <= 64));

    let ciphertext = stdout_of(
        bin(dir.path())
            .arg("rsa-encrypt")
            .arg("hello rsa")
            .arg("--public-key")
            .arg(keys.join("public.pem")),
    );

    bin(dir.path())
        .arg("rsa-decrypt")
        .arg(ciphertext.trim())
        .arg("--private-key")
        .arg(keys.join("private.pem"))
        .assert()
        .success()
        .stdout("hello rsa\n");

    bin(dir.path())
        .arg("check-public-key")
        .arg(keys.join("public.pem"))
        .assert()
        .success()
        .stdout(predicate::str::contains("valid RSA-1024 public key"));

    bin(dir.path())
        .arg("check-public-key")
        .arg(keys.join("private.pem"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid public key"));
}

#[test]
fn oversized_rsa_payload_fails() {
    let dir = tempdir().unwrap();
    let keys = dir.path().join("keys");

    bin(dir.path())
        .arg("rsa-keygen")
        .arg("--bits")
        .arg("1024")
        .arg("--out-dir")
        .arg(&keys)
        .assert()
        .success();

    bin(dir.path())
        .arg("rsa-encrypt")
        .arg("x".repeat(118))
        .arg("--public-key")
        .arg(keys.join("public.pem"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("at most 117"));
}

#[test]
fn backup_wrap_and_unwrap() {
    let dir = tempdir().unwrap();
    let keys = dir.path().join("keys");
    let line_file = dir.path().join("backup.txt");
    let json_file = dir.path().join("backup.json");

    bin(dir.path())
        .arg("rsa-keygen")
        .arg("--bits")
        .arg("1024")
        .arg("--out-dir")
        .arg(&keys)
        .assert()
        .success();
    let private_pem = std::fs::read_to_string(keys.join("private.pem")).unwrap();

    let line = stdout_of(
        bin(dir.path())
            .env("VAULTKIT_PASSWORD", "backup-pw")
            .arg("backup-wrap")
            .arg("--private-key")
            .arg(keys.join("private.pem")),
    );
    assert!(line.starts_with("VAULTKIT_KEY_EXPORT|"));
    std::fs::write(&line_file, &line).unwrap();

    let json = stdout_of(
        bin(dir.path())
            .env("VAULTKIT_PASSWORD", "backup-pw")
            .arg("backup-wrap")
            .arg("--legacy")
            .arg("--json")
            .arg("--private-key")
            .arg(keys.join("private.pem")),
    );
    std::fs::write(&json_file, &json).unwrap();

    for record in [&line_file, &json_file] {
        bin(dir.path())
            .env("VAULTKIT_PASSWORD", "backup-pw")
            .arg("backup-unwrap")
            .arg("--pem")
            .arg(record)
            .assert()
            .success()
            .stdout(predicate::str::diff(format!("{}\n", private_pem.trim_end())));
    }

    bin(dir.path())
        .env("VAULTKIT_PASSWORD", "wrong")
        .arg("backup-unwrap")
        .arg(&line_file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to unwrap private key"));
}

#[test]
fn verbose_logs_to_stderr_without_secrets() {
    let dir = tempdir().unwrap();

    bin(dir.path())
        .env("VAULTKIT_PASSWORD", "very-secret-password")
        .arg("--verbose")
        .arg("encrypt-text")
        .arg("hidden plaintext")
        .assert()
        .success()
        .stderr(predicate::str::contains("sealed envelope"))
        .stderr(predicate::str::contains("very-secret-password").not())
        .stderr(predicate::str::contains("hidden plaintext").not());
}

#[test]
fn dotenv_file_supplies_password() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join(".env"), "VAULTKIT_PASSWORD=from-dotenv\n").unwrap();

    let envelope = stdout_of(bin(dir.path()).arg("encrypt-text").arg("dotenv"));

    bin(dir.path())
        .env("VAULTKIT_PASSWORD", "from-dotenv")
        .arg("decrypt-text")
        .arg(envelope.trim())
        .assert()
        .success()
        .stdout("dotenv\n");
}
