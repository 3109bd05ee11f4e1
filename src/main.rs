use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
mod auth;
use rsa::traits::PublicKeyParts;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use vaultkit::storage::AtomicFile;
use vaultkit::{
    KdfParams, KeyBackupRecord, KeyMaterial, KeySize, PemKind, RsaKeyBits, SymmetricKey, backup,
    encoding,
};
use zeroize::Zeroizing;

fn parse_key_size(s: &str) -> Result<KeySize, String> {
    let bits: u32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    KeySize::from_bits(bits).map_err(|e| e.to_string())
}

fn parse_rsa_bits(s: &str) -> Result<RsaKeyBits, String> {
    let bits: u32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    RsaKeyBits::from_bits(bits).map_err(|e| e.to_string())
}

#[derive(Debug, clap::Args)]
struct KeyArgs {
    /// AES key size in bits (128, 192 or 256)
    #[arg(long, default_value = "256", value_parser = parse_key_size)]
    bits: KeySize,

    /// Base64 raw AES key to use instead of a password
    #[arg(long, env = "VAULTKIT_KEY", hide_env_values = true)]
    key: Option<String>,
}

impl KeyArgs {
    fn material(&self, confirm: bool) -> Result<KeyMaterial> {
        if let Some(key) = &self.key {
            let bytes = Zeroizing::new(encoding::decode(key).context("--key is not valid Base64")?);
            return Ok(KeyMaterial::raw(&bytes));
        }

        let password = if confirm {
            auth::read_new_password_with_confirmation()?
        } else {
            auth::read_password()?
        };
        Ok(KeyMaterial::password(&password))
    }
}

#[derive(Debug, Parser)]
#[command(name = "vaultkit")]
#[command(
    version,
    about = "Password and key based encryption for text, files and RSA keys."
)]
struct Cli {
    /// Log operation details to stderr
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// PBKDF2 iterations for password based keys (default: 10000)
    #[arg(long, global = true, value_name = "N", env = "VAULTKIT_KDF_ITERATIONS")]
    kdf_iterations: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn kdf_params(&self) -> Result<KdfParams> {
        match self.kdf_iterations {
            Some(n) => KdfParams::new(n).context("invalid --kdf-iterations"),
            None => Ok(KdfParams::default()),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generates a random AES key and prints it as Base64
    GenKey {
        #[arg(long, default_value = "256", value_parser = parse_key_size)]
        bits: KeySize,
    },

    /// Encrypts text into a Base64 envelope
    #[command(arg_required_else_help = true)]
    EncryptText {
        text: String,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Decrypts a Base64 envelope
    #[command(arg_required_else_help = true)]
    DecryptText {
        envelope: String,
        #[command(flatten)]
        key: KeyArgs,
        /// Treat the password as a raw key when it decodes to a key of the right size
        #[arg(long, default_value_t = false)]
        infer_key: bool,
    },

    /// Encrypts a file; prints the salt when a password is used
    #[command(arg_required_else_help = true)]
    EncryptFile {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
        /// Base64 salt to reuse instead of generating one
        #[arg(long)]
        salt: Option<String>,
    },

    /// Decrypts a file produced by encrypt-file
    #[command(arg_required_else_help = true)]
    DecryptFile {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
        /// Base64 salt printed by encrypt-file (required with a password)
        #[arg(long)]
        salt: Option<String>,
    },

    /// Generates an RSA key pair
    RsaKeygen {
        #[arg(long, default_value = "2048", value_parser = parse_rsa_bits)]
        bits: RsaKeyBits,
        /// Writes public.pem and private.pem into this directory instead of printing
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },

    /// Encrypts short text with an RSA public key
    #[command(arg_required_else_help = true)]
    RsaEncrypt {
        text: String,
        /// PEM or Base64 public key file
        #[arg(long, value_name = "PATH")]
        public_key: PathBuf,
    },

    /// Decrypts RSA ciphertext with a private key
    #[command(arg_required_else_help = true)]
    RsaDecrypt {
        ciphertext: String,
        /// PEM or Base64 private key file
        #[arg(long, value_name = "PATH")]
        private_key: PathBuf,
    },

    /// Wraps a private key under a password
    #[command(arg_required_else_help = true)]
    BackupWrap {
        /// PEM or Base64 private key file
        #[arg(long, value_name = "PATH")]
        private_key: PathBuf,
        /// Use the legacy AES-CBC scheme
        #[arg(long, default_value_t = false)]
        legacy: bool,
        /// Print the record as JSON instead of an export line
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Recovers a private key from a backup record
    #[command(arg_required_else_help = true)]
    BackupUnwrap {
        /// File holding an export line or a JSON record
        record: PathBuf,
        /// Print the key as PEM
        #[arg(long, default_value_t = false)]
        pem: bool,
    },

    /// Checks whether a file holds a valid RSA public key
    #[command(arg_required_else_help = true)]
    CheckPublicKey { public_key: PathBuf },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("vaultkit=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vaultkit=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_key_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    vaultkit::from_pem(&text).with_context(|| format!("{} holds no key", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut out = AtomicFile::create(path)?;
    out.write_all(contents.as_bytes())?;
    out.write_all(b"\n")?;
    out.commit()
        .with_context(|| format!("failed to write {}", path.display()))
}

fn decode_salt(salt: &str) -> Result<Vec<u8>> {
    encoding::decode(salt).context("--salt is not valid Base64")
}

fn progress_printer() -> impl FnMut(u8) {
    let show = std::io::stderr().is_terminal();
    let mut last = None;
    move |percent| {
        if show && last != Some(percent) {
            last = Some(percent);
            eprint!("\r{percent:>3}%");
            if percent == 100 {
                eprintln!();
            }
        }
    }
}

fn file_key(
    material: &KeyMaterial,
    salt: &[u8],
    bits: KeySize,
    kdf: KdfParams,
) -> Result<SymmetricKey> {
    material
        .resolve(salt, bits, kdf)
        .context("failed to derive file key")
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    init_tracing(args.verbose);
    let kdf = args.kdf_params()?;

    match args.command {
        Commands::GenKey { bits } => {
            let key = SymmetricKey::generate(bits)?;
            println!("{}", key.to_base64().as_str());
        }
        Commands::EncryptText { text, key } => {
            let material = key.material(true)?;
            let envelope = vaultkit::encrypt_string_with_kdf(&text, &material, key.bits, kdf)?;
            println!("{envelope}");
        }
        Commands::DecryptText {
            envelope,
            key,
            infer_key,
        } => {
            let material = match key.material(false)? {
                KeyMaterial::Password(pw) if infer_key => KeyMaterial::infer(&pw, key.bits),
                other => other,
            };
            let plaintext = vaultkit::decrypt_string_with_kdf(&envelope, &material, key.bits, kdf)
                .context("failed to decrypt text")?;
            println!("{plaintext}");
        }
        Commands::EncryptFile {
            input,
            output,
            key,
            salt,
        } => {
            let material = key.material(true)?;
            let salt = match salt {
                Some(s) => decode_salt(&s)?,
                None => vaultkit::crypto::rng::generate_salt()?.to_vec(),
            };
            let file_key = file_key(&material, &salt, key.bits, kdf)?;

            let summary = vaultkit::encrypt_file(&input, &output, &file_key, progress_printer())
                .with_context(|| format!("failed to encrypt {}", input.display()))?;

            if material.is_password() {
                println!("salt: {}", encoding::encode(&salt));
            }
            println!(
                "encrypted {} bytes into {}",
                summary.bytes_read,
                output.display()
            );
        }
        Commands::DecryptFile {
            input,
            output,
            key,
            salt,
        } => {
            let material = key.material(false)?;
            let salt = match (salt, material.is_password()) {
                (Some(s), _) => decode_salt(&s)?,
                (None, false) => Vec::new(),
                (None, true) => bail!("--salt is required to decrypt a password-encrypted file"),
            };
            let file_key = file_key(&material, &salt, key.bits, kdf)?;

            let summary = vaultkit::decrypt_file(&input, &output, &file_key, progress_printer())
                .with_context(|| format!("failed to decrypt {}", input.display()))?;
            println!(
                "decrypted {} bytes into {}",
                summary.bytes_written,
                output.display()
            );
        }
        Commands::RsaKeygen { bits, out_dir } => {
            let pair = vaultkit::generate_key_pair(bits)?;
            let public = vaultkit::to_pem(pair.public_key(), PemKind::PublicKey)?;
            let private = Zeroizing::new(vaultkit::to_pem(pair.private_key(), PemKind::PrivateKey)?);

            match out_dir {
                Some(dir) => {
                    write_file(&dir.join("public.pem"), &public)?;
                    write_file(&dir.join("private.pem"), &private)?;
                    println!("wrote RSA-{} key pair to {}", bits.bits(), dir.display());
                }
                None => {
                    println!("{public}");
                    println!("{}", private.as_str());
                }
            }
        }
        Commands::RsaEncrypt { text, public_key } => {
            let public_key = read_key_file(&public_key)?;
            let ciphertext = vaultkit::encrypt_with_public_key(text.as_bytes(), &public_key)?;
            println!("{ciphertext}");
        }
        Commands::RsaDecrypt {
            ciphertext,
            private_key,
        } => {
            let private_key = Zeroizing::new(read_key_file(&private_key)?);
            let plaintext = vaultkit::decrypt_with_private_key(&ciphertext, &private_key)
                .context("failed to decrypt RSA ciphertext")?;
            let text = std::str::from_utf8(&plaintext).context("plaintext is not UTF-8")?;
            println!("{text}");
        }
        Commands::BackupWrap {
            private_key,
            legacy,
            json,
        } => {
            let private_key = Zeroizing::new(read_key_file(&private_key)?);
            let password = auth::read_new_password_with_confirmation()?;

            let record = if legacy {
                backup::wrap_legacy(&private_key, &password)?
            } else {
                backup::wrap_with_kdf(&private_key, &password, kdf)?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{}", record.to_export_line());
            }
        }
        Commands::BackupUnwrap { record, pem } => {
            let text = std::fs::read_to_string(&record)
                .with_context(|| format!("failed to read {}", record.display()))?;
            let record: KeyBackupRecord = if text.trim_start().starts_with('{') {
                serde_json::from_str(&text).context("invalid backup JSON")?
            } else {
                KeyBackupRecord::from_export_line(&text)?
            };

            let password = auth::read_password()?;
            let private_key = backup::unwrap_with_kdf(&record, &password, kdf)
                .context("failed to unwrap private key")?;

            if pem {
                let pem = Zeroizing::new(vaultkit::to_pem(&private_key, PemKind::PrivateKey)?);
                println!("{}", pem.as_str());
            } else {
                println!("{}", private_key.as_str());
            }
        }
        Commands::CheckPublicKey { public_key } => {
            let candidate = read_key_file(&public_key)?;
            let key = vaultkit::asymmetric::inspect_public_key(&candidate)
                .with_context(|| format!("{} is not a valid public key", public_key.display()))?;
            println!("valid RSA-{} public key", key.size() * 8);
        }
    }

    Ok(())
}
