//! kcfs: key chain control for encrypted filesystem roots
//!
//! Keyring commands:
//!   addkey <fsroot>      - derive a key and install its chain
//!   delkey <fsroot>      - remove a key and its chain from the keyring
//!   setkey <dir>         - bind a key to a directory
//!   getkey <path>        - show the key bound to a path
//!   showkeys <fsroot>    - list installed keys
//!   flushkeys <fsroot>   - remove every installed key
//!
//! Key chain commands:
//!   addchain <fsroot>    - link a parent key to a chained key (or seal it)
//!   delchain <fsroot>    - delete the chain rooted at a key
//!   showchains <fsroot>  - print the chain rooted at a key
//!   randomchain <fsroot> - add decoy links
//!   showalgs             - list supported algorithms

mod platform_keyring;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use zeroize::Zeroizing;

use kcfs_core::config::{KcfsConfig, KeysConfig};
use kcfs_core::{ChainMode, KeyId, KeychainError};
use kcfs_crypto::{algorithms, derive_key, Key, KeyParams};
use kcfs_keychain::{
    install_chain, remove_chain, Chain, ChainStore, ChainTarget, ChaffRange, DeleteScope, Keychain,
    Keyring,
};

use platform_keyring::PlatformKeyring;

const EXIT_GENERIC: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_INVALID: u8 = 3;
const EXIT_IO: u8 = 4;
const EXIT_SYS: u8 = 5;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "kcfs",
    version,
    about = "Key chain control for encrypted filesystems",
    long_about = "kcfs: derive keys from passphrases, manage the key chains stored in a \
                  filesystem root, and load resolved chains into the keyring"
)]
struct Cli {
    /// Path to kcfs.toml configuration file
    #[arg(long, env = "KCFS_CONFIG", default_value = "/etc/kcfs/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "KCFS_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config file
    #[arg(long, env = "KCFS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive a key and add it, with every key it chains to, to the keyring
    Addkey {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        chain: ChainArgs,
        /// Print each key as it is added
        #[arg(short, long)]
        verbose: bool,
        /// Filesystem root
        fsroot: PathBuf,
    },

    /// Derive a key and remove it, with every key it chains to, from the keyring
    Delkey {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        chain: ChainArgs,
        /// Print each key as it is removed
        #[arg(short, long)]
        verbose: bool,
        /// Filesystem root
        fsroot: PathBuf,
    },

    /// Bind a key to a directory
    Setkey {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        chain: ChainArgs,
        /// Add the key to the keyring first if it is not installed
        #[arg(short = 'x', long, conflicts_with = "chain")]
        add: bool,
        /// Print the binding
        #[arg(short, long)]
        verbose: bool,
        /// Directory inside a filesystem root
        directory: PathBuf,
    },

    /// Show the key bound to a path
    Getkey {
        /// Only set the exit status: 0 if the path has a key, 1 otherwise
        #[arg(short, long)]
        test: bool,
        path: PathBuf,
    },

    /// List the keys in the keyring
    Showkeys {
        /// Only set the exit status: 0 if any key is installed, 3 otherwise
        #[arg(short, long)]
        test: bool,
        /// Filesystem root
        fsroot: PathBuf,
    },

    /// Remove every key from the keyring
    Flushkeys {
        /// Filesystem root
        fsroot: PathBuf,
    },

    /// Link a parent key to a chained key, or seal the parent's chain
    Addchain {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        chained: ChainedKeyArgs,
        /// Seal the parent's chain instead of linking a second key
        #[arg(
            short = 'Z',
            long,
            conflicts_with_all = [
                "chained_algorithm",
                "chained_iterations",
                "chained_keyfile",
                "chained_no_passphrase",
            ]
        )]
        seal: bool,
        /// Print the link
        #[arg(short, long)]
        verbose: bool,
        /// Filesystem root
        fsroot: PathBuf,
    },

    /// Delete the chain rooted at a key
    Delchain {
        #[command(flatten)]
        key: KeyArgs,
        /// Delete every link down to the end of the chain, not just the first
        #[arg(short = 'F', long)]
        full: bool,
        /// Print each deleted link
        #[arg(short, long)]
        verbose: bool,
        /// Filesystem root
        fsroot: PathBuf,
    },

    /// Print the chain rooted at a key
    Showchains {
        #[command(flatten)]
        key: KeyArgs,
        /// Filesystem root
        fsroot: PathBuf,
    },

    /// Add a random number of decoy links
    Randomchain {
        /// Lower bound (overrides config)
        #[arg(short = 'n', long, allow_negative_numbers = true)]
        min: Option<i64>,
        /// Upper bound (overrides config)
        #[arg(short = 'N', long, allow_negative_numbers = true)]
        max: Option<i64>,
        /// Print each decoy link
        #[arg(short, long)]
        verbose: bool,
        /// Filesystem root
        fsroot: PathBuf,
    },

    /// List supported algorithms
    Showalgs,
}

/// How a key is derived; unset options fall back to the `[keys]` config section.
#[derive(Args, Debug)]
struct KeyArgs {
    /// Algorithm (see `kcfs showalgs`)
    #[arg(short = 'a', long)]
    algorithm: Option<String>,
    /// Argon2id iterations
    #[arg(short = 'i', long, allow_negative_numbers = true)]
    iterations: Option<i64>,
    /// Mix the contents of this file into the key
    #[arg(short = 'k', long)]
    keyfile: Option<PathBuf>,
    /// Derive the key from the keyfile alone
    #[arg(short = 'p', long)]
    no_passphrase: bool,
}

/// Derivation options for the second key of `addchain`.
#[derive(Args, Debug)]
struct ChainedKeyArgs {
    /// Algorithm of the chained key
    #[arg(short = 'A', long)]
    chained_algorithm: Option<String>,
    /// Argon2id iterations for the chained key
    #[arg(short = 'I', long, allow_negative_numbers = true)]
    chained_iterations: Option<i64>,
    /// Keyfile for the chained key
    #[arg(short = 'K', long)]
    chained_keyfile: Option<PathBuf>,
    /// Derive the chained key from its keyfile alone
    #[arg(short = 'P', long)]
    chained_no_passphrase: bool,
}

#[derive(Args, Debug)]
struct ChainArgs {
    /// Require the key to have a stored chain
    #[arg(short = 'c', long, conflicts_with = "no_chain")]
    chain: bool,
    /// Use the key alone, ignoring any stored chain
    #[arg(short = 'C', long)]
    no_chain: bool,
}

impl KeyArgs {
    fn params(&self, config: &KeysConfig) -> KeyParams {
        key_params(
            config,
            self.algorithm.as_deref(),
            self.iterations,
            self.keyfile.as_deref(),
            self.no_passphrase,
        )
    }
}

impl ChainedKeyArgs {
    fn params(&self, config: &KeysConfig) -> KeyParams {
        key_params(
            config,
            self.chained_algorithm.as_deref(),
            self.chained_iterations,
            self.chained_keyfile.as_deref(),
            self.chained_no_passphrase,
        )
    }
}

fn key_params(
    config: &KeysConfig,
    algorithm: Option<&str>,
    iterations: Option<i64>,
    keyfile: Option<&Path>,
    no_passphrase: bool,
) -> KeyParams {
    let mut params = KeyParams::from_config(config);
    if let Some(algorithm) = algorithm {
        params.algorithm = algorithm.to_string();
    }
    if let Some(iterations) = iterations {
        params.iterations = iterations;
    }
    if let Some(keyfile) = keyfile {
        params.keyfile = Some(keyfile.to_path_buf());
    }
    params.no_passphrase |= no_passphrase;
    params
}

/// Failures reading a passphrase from the terminal.
#[derive(Debug, thiserror::Error)]
enum PromptError {
    #[error("unable to read passphrase")]
    Unreadable,
    #[error("passphrases didn't match")]
    Mismatch,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kcfs: {e:#}");
            return ExitCode::from(exit_code(&e));
        }
    };

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.clone().unwrap_or_else(|| {
        LogFormat::from_str(&config.log.format, true).unwrap_or(LogFormat::Text)
    });
    init_logging(level, &format);

    match run(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("kcfs: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(command: Commands, config: &KcfsConfig) -> Result<ExitCode> {
    match command {
        Commands::Addkey {
            key,
            chain,
            verbose,
            fsroot,
        } => cmd_addkey(config, &key, &chain, verbose, &fsroot),
        Commands::Delkey {
            key,
            chain,
            verbose,
            fsroot,
        } => cmd_delkey(config, &key, &chain, verbose, &fsroot),
        Commands::Setkey {
            key,
            chain,
            add,
            verbose,
            directory,
        } => cmd_setkey(config, &key, &chain, add, verbose, &directory),
        Commands::Getkey { test, path } => cmd_getkey(&path, test),
        Commands::Showkeys { test, fsroot } => cmd_showkeys(&fsroot, test),
        Commands::Flushkeys { fsroot } => cmd_flushkeys(&fsroot),
        Commands::Addchain {
            key,
            chained,
            seal,
            verbose,
            fsroot,
        } => cmd_addchain(config, &key, &chained, seal, verbose, &fsroot),
        Commands::Delchain {
            key,
            full,
            verbose,
            fsroot,
        } => cmd_delchain(config, &key, full, verbose, &fsroot),
        Commands::Showchains { key, fsroot } => cmd_showchains(config, &key, &fsroot),
        Commands::Randomchain {
            min,
            max,
            verbose,
            fsroot,
        } => cmd_randomchain(config, min, max, verbose, &fsroot),
        Commands::Showalgs => {
            show_algorithms();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Map an error to the exit status scripts expect.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<KeychainError>() {
            return match e {
                KeychainError::Usage(_) => EXIT_USAGE,
                KeychainError::Store { .. } => EXIT_IO,
                KeychainError::Keyring(_) | KeychainError::Crypto(_) => EXIT_SYS,
                e if e.is_invalid_input() => EXIT_INVALID,
                _ => EXIT_GENERIC,
            };
        }
        if cause.is::<PromptError>() {
            return EXIT_INVALID;
        }
        if cause.is::<toml::de::Error>() {
            return EXIT_USAGE;
        }
        if cause.is::<std::io::Error>() {
            return EXIT_IO;
        }
    }
    EXIT_GENERIC
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<KcfsConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(KcfsConfig::default())
    }
}

// ── Keys and roots ────────────────────────────────────────────────────────────

fn read_passphrase(prompt: &str, verify: bool) -> Result<SecretString> {
    let read = |verb: &str| {
        rpassword::prompt_password(format!("{verb} {prompt}: "))
            .map(Zeroizing::new)
            .map_err(|_| PromptError::Unreadable)
    };

    let mut first = read("Enter")?;
    if first.is_empty() {
        return Err(PromptError::Unreadable.into());
    }
    if verify {
        let second = read("Reenter")?;
        if *first != *second {
            return Err(PromptError::Mismatch.into());
        }
    }
    Ok(SecretString::from(std::mem::take(&mut *first)))
}

/// Prompt for a passphrase (unless suppressed) and derive the key.
///
/// Parameters are checked before prompting.
fn read_key(params: &KeyParams, prompt: &str, verify: bool) -> Result<Key> {
    params.validate()?;
    let passphrase = if params.no_passphrase {
        None
    } else {
        Some(read_passphrase(prompt, verify)?)
    };
    Ok(derive_key(passphrase.as_ref(), params)?)
}

fn fs_root(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .map_err(|e| KeychainError::store(path, e))?;
    if !root.is_dir() {
        let msg = format!("not a directory: {}", path.display());
        return Err(KeychainError::Usage(msg).into());
    }
    Ok(root)
}

/// Nearest ancestor of `path` that holds a key chain store or its lock file.
fn find_fsroot(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|dir| {
            ChainStore::lock_path_for(dir).exists() || ChainStore::path_for(dir).exists()
        })
        .map(Path::to_path_buf)
        .unwrap_or_else(|| {
            if path.is_dir() {
                path.to_path_buf()
            } else {
                path.parent().unwrap_or(path).to_path_buf()
            }
        })
}

fn resolve_for_keyring(
    keychain: &Keychain,
    key: Key,
    chain: &ChainArgs,
    config: &KcfsConfig,
) -> Result<Chain> {
    if chain.no_chain {
        return Ok(Chain::single(key));
    }
    let mode = if chain.chain {
        ChainMode::Use
    } else {
        config.chain.mode
    };
    keychain
        .get(&key, mode)
        .with_context(|| format!("resolving key chain for {}", key.id()))
}

/// Key bound to `path` or to the closest ancestor up to `fsroot`.
fn node_key<K: Keyring + ?Sized>(keyring: &K, path: &Path, fsroot: &Path) -> Result<Option<Key>> {
    for dir in path.ancestors() {
        if let Some(key) = keyring.path_key(dir)? {
            return Ok(Some(key));
        }
        if dir == fsroot {
            break;
        }
    }
    Ok(None)
}

fn show_indexed(key: &Key, index: u32) {
    println!("\t{:<4} {} {}", index, key.id(), key.algorithm());
}

fn show_node(key: Option<&Key>, path: &Path) {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_else(|| path.to_string_lossy());
    match key {
        Some(key) => println!("Key({base}): {} {}", key.id(), key.algorithm()),
        None => println!("Key({base}): <not specified>"),
    }
}

// ── Keyring commands ──────────────────────────────────────────────────────────

fn cmd_addkey(
    config: &KcfsConfig,
    key: &KeyArgs,
    chain: &ChainArgs,
    verbose: bool,
    fsroot: &Path,
) -> Result<ExitCode> {
    let fsroot = fs_root(fsroot)?;
    let key = read_key(&key.params(&config.keys), "passphrase", false)?;
    let chain = resolve_for_keyring(&Keychain::new(&fsroot), key, chain, config)?;

    let mut keyring = PlatformKeyring::connect(&fsroot)?;
    let result = install_chain(&mut keyring, &chain);
    if verbose {
        let installed = match &result {
            Ok(n) => *n,
            Err(_) => keyring_prefix(&keyring, &chain),
        };
        for key in &chain.keys()[..installed] {
            println!("Key added: {}", key.id());
        }
    }
    result.context("cannot add key")?;
    Ok(ExitCode::SUCCESS)
}

/// How many leading chain keys are present in the keyring.
fn keyring_prefix<K: Keyring + ?Sized>(keyring: &K, chain: &Chain) -> usize {
    let installed = keyring.keys().unwrap_or_default();
    chain
        .iter()
        .take_while(|key| installed.iter().any(|k| k.id() == key.id()))
        .count()
}

fn cmd_delkey(
    config: &KcfsConfig,
    key: &KeyArgs,
    chain: &ChainArgs,
    verbose: bool,
    fsroot: &Path,
) -> Result<ExitCode> {
    let fsroot = fs_root(fsroot)?;
    let key = read_key(&key.params(&config.keys), "passphrase", false)?;
    let chain = resolve_for_keyring(&Keychain::new(&fsroot), key, chain, config)?;

    let mut keyring = PlatformKeyring::connect(&fsroot)?;
    let failures = remove_chain(&mut keyring, &chain);
    for (id, e) in &failures {
        eprintln!("kcfs: cannot delete key {id}: {e}");
    }
    if verbose {
        for key in chain.iter().filter(|k| failures.iter().all(|(id, _)| *id != k.id())) {
            println!("Key deleted: {}", key.id());
        }
    }
    Ok(ExitCode::from(removal_status(&failures)))
}

/// Exit status once every key of a chain has been tried: "not found" alone is
/// invalid input, any other failure is a system error.
fn removal_status(failures: &[(KeyId, KeychainError)]) -> u8 {
    if failures.is_empty() {
        0
    } else if failures
        .iter()
        .all(|(_, e)| matches!(e, KeychainError::NotFound { .. }))
    {
        EXIT_INVALID
    } else {
        EXIT_SYS
    }
}

fn cmd_setkey(
    config: &KcfsConfig,
    key: &KeyArgs,
    chain: &ChainArgs,
    add: bool,
    verbose: bool,
    directory: &Path,
) -> Result<ExitCode> {
    let directory = fs_root(directory)?;
    let fsroot = find_fsroot(&directory);
    let key = read_key(&key.params(&config.keys), "passphrase", false)?;

    // Resolving checks the chain requirement; only the head is bound.
    let chain = resolve_for_keyring(&Keychain::new(&fsroot), key, chain, config)?;
    let key = chain.root();

    let mut keyring = PlatformKeyring::connect(&fsroot)?;
    if add {
        keyring.add_key(key).context("cannot add key")?;
    }
    keyring
        .set_path_key(&directory, key)
        .with_context(|| format!("cannot set key for {}", directory.display()))?;

    if verbose {
        show_node(Some(key), &directory);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_getkey(path: &Path, test: bool) -> Result<ExitCode> {
    let path = path
        .canonicalize()
        .map_err(|e| KeychainError::store(path, e))?;
    let fsroot = find_fsroot(&path);
    let keyring = PlatformKeyring::connect(&fsroot)?;

    let key = node_key(&keyring, &path, &fsroot)?;
    if test {
        return Ok(if key.is_some() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(EXIT_GENERIC)
        });
    }
    show_node(key.as_ref(), &path);
    Ok(ExitCode::SUCCESS)
}

fn cmd_showkeys(fsroot: &Path, test: bool) -> Result<ExitCode> {
    let fsroot = fs_root(fsroot)?;
    let keyring = PlatformKeyring::connect(&fsroot)?;
    let keys = keyring.keys().context("cannot list keys")?;

    if test {
        return Ok(if keys.is_empty() {
            ExitCode::from(EXIT_INVALID)
        } else {
            ExitCode::SUCCESS
        });
    }
    if keys.is_empty() {
        println!("No keys specified");
    } else {
        println!("Keys:");
        for (i, key) in keys.iter().enumerate() {
            show_indexed(key, key.index().unwrap_or(i as u32));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_flushkeys(fsroot: &Path) -> Result<ExitCode> {
    let fsroot = fs_root(fsroot)?;
    let mut keyring = PlatformKeyring::connect(&fsroot)?;
    keyring.flush().context("cannot flush keys")?;
    Ok(ExitCode::SUCCESS)
}

// ── Key chain commands ────────────────────────────────────────────────────────

fn cmd_addchain(
    config: &KcfsConfig,
    key: &KeyArgs,
    chained: &ChainedKeyArgs,
    seal: bool,
    verbose: bool,
    fsroot: &Path,
) -> Result<ExitCode> {
    let fsroot = fs_root(fsroot)?;
    let keychain = Keychain::new(&fsroot);

    let parent_params = key.params(&config.keys);
    let chained_params = chained.params(&config.keys);
    if !seal {
        chained_params.validate()?;
    }

    let parent = read_key(&parent_params, "parent key passphrase", true)?;
    let target = if seal {
        ChainTarget::Seal
    } else {
        ChainTarget::Key(read_key(&chained_params, "chained key passphrase", true)?)
    };

    keychain.set(&parent, &target)?;

    if verbose {
        match &target {
            ChainTarget::Key(child) => {
                println!("Key chain set: {} -> {}", parent.id(), child.id())
            }
            ChainTarget::Seal => println!("Key chain set: {}", parent.id()),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_delchain(
    config: &KcfsConfig,
    key: &KeyArgs,
    full: bool,
    verbose: bool,
    fsroot: &Path,
) -> Result<ExitCode> {
    let fsroot = fs_root(fsroot)?;
    let key = read_key(&key.params(&config.keys), "passphrase", false)?;
    let scope = if full {
        DeleteScope::Full
    } else {
        DeleteScope::First
    };

    let removed = Keychain::new(&fsroot).delete(&key, scope)?;
    if verbose {
        for link in &removed {
            match link.child {
                Some(child) => println!("Key chain deleted: {} -> {}", link.parent, child),
                None => println!("Key chain deleted: {}", link.parent),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_showchains(config: &KcfsConfig, key: &KeyArgs, fsroot: &Path) -> Result<ExitCode> {
    let fsroot = fs_root(fsroot)?;
    let key = read_key(&key.params(&config.keys), "passphrase", false)?;
    let chain = Keychain::new(&fsroot).get(&key, ChainMode::Use)?;

    println!("Key chain:");
    for (i, key) in chain.iter().enumerate() {
        show_indexed(key, i as u32 + 1);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_randomchain(
    config: &KcfsConfig,
    min: Option<i64>,
    max: Option<i64>,
    verbose: bool,
    fsroot: &Path,
) -> Result<ExitCode> {
    let range = ChaffRange::new(
        min.unwrap_or(config.chaff.min),
        max.unwrap_or(config.chaff.max),
    )?;
    let fsroot = fs_root(fsroot)?;

    let added = Keychain::new(&fsroot).inject_chaff_in(range)?;
    if verbose {
        for (parent, child) in &added {
            println!("Key chain set: {parent} -> {child}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn show_algorithms() {
    println!("Supported algorithms:");
    for algorithm in algorithms() {
        println!("\t{:<20} {}", algorithm.name(), algorithm.key_bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use kcfs_core::KeyAlgorithm;
    use kcfs_keychain::MemoryKeyring;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_addchain_flags() {
        let cli = Cli::try_parse_from([
            "kcfs", "addchain", "-a", "aes128-xts", "-I", "5", "-P", "-K", "/tmp/kf", "/mnt",
        ])
        .unwrap();
        let Commands::Addchain {
            key,
            chained,
            seal,
            ..
        } = cli.command
        else {
            panic!("expected addchain");
        };
        assert!(!seal);

        let config = KeysConfig::default();
        let parent = key.params(&config);
        assert_eq!(parent.algorithm, "aes128-xts");
        assert_eq!(parent.iterations, config.iterations);

        let child = chained.params(&config);
        assert_eq!(child.algorithm, config.algorithm);
        assert_eq!(child.iterations, 5);
        assert!(child.no_passphrase);
        assert_eq!(child.keyfile.as_deref(), Some(Path::new("/tmp/kf")));
    }

    #[test]
    fn test_seal_conflicts_with_chained_key() {
        let result = Cli::try_parse_from(["kcfs", "addchain", "-Z", "-I", "5", "/mnt"]);
        assert!(result.is_err());
        assert!(Cli::try_parse_from(["kcfs", "addchain", "-Z", "-i", "5", "/mnt"]).is_ok());
    }

    #[test]
    fn test_setkey_add_conflicts_with_chain() {
        assert!(Cli::try_parse_from(["kcfs", "setkey", "-x", "-c", "/mnt/dir"]).is_err());
        assert!(Cli::try_parse_from(["kcfs", "setkey", "-x", "-C", "/mnt/dir"]).is_ok());
    }

    #[test]
    fn test_negative_iterations_reach_validation() {
        let cli = Cli::try_parse_from(["kcfs", "showchains", "-i", "-3", "/mnt"]).unwrap();
        let Commands::Showchains { key, .. } = cli.command else {
            panic!("expected showchains");
        };
        let err: anyhow::Error = key
            .params(&KeysConfig::default())
            .validate()
            .unwrap_err()
            .into();
        assert_eq!(exit_code(&err), EXIT_USAGE);
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = KeychainError::Usage("bad".into()).into();
        assert_eq!(exit_code(&usage), EXIT_USAGE);

        let not_found: anyhow::Error = KeychainError::NotFound { id: KeyId::new(1) }.into();
        assert_eq!(exit_code(&not_found.context("resolving")), EXIT_INVALID);

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let store: anyhow::Error = KeychainError::store("/x", denied).into();
        assert_eq!(exit_code(&store), EXIT_IO);

        let keyring: anyhow::Error = KeychainError::Keyring("down".into()).into();
        assert_eq!(exit_code(&keyring), EXIT_SYS);

        let prompt: anyhow::Error = PromptError::Mismatch.into();
        assert_eq!(exit_code(&prompt), EXIT_INVALID);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), EXIT_GENERIC);
    }

    #[test]
    fn test_delkey_failures_set_exit_status() {
        assert_eq!(removal_status(&[]), 0);

        let missing = KeychainError::NotFound { id: KeyId::new(2) };
        assert_eq!(removal_status(&[(KeyId::new(2), missing)]), EXIT_INVALID);

        let failures = [
            (KeyId::new(2), KeychainError::NotFound { id: KeyId::new(2) }),
            (KeyId::new(3), KeychainError::Keyring("locked".into())),
        ];
        assert_eq!(removal_status(&failures), EXIT_SYS);
    }

    #[test]
    fn test_removing_absent_chain_is_not_success() {
        let mut keyring = MemoryKeyring::new();
        let installed = Key::random(KeyAlgorithm::Aes256Xts).unwrap();
        let absent = Key::random(KeyAlgorithm::Aes256Xts).unwrap();
        keyring.add_key(&installed).unwrap();

        let failures = remove_chain(&mut keyring, &Chain::single(absent));
        assert_eq!(failures.len(), 1);
        assert_ne!(removal_status(&failures), 0);
        assert!(remove_chain(&mut keyring, &Chain::single(installed)).is_empty());
    }

    #[test]
    fn test_config_fallback_and_parse() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("absent.toml");
        assert_eq!(load_config(&missing).unwrap().keys.iterations, 3);

        let path = tmp.path().join("kcfs.toml");
        std::fs::write(&path, "[keys]\niterations = 7\n[chain]\nmode = \"use\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.keys.iterations, 7);
        assert_eq!(config.chain.mode, ChainMode::Use);

        std::fs::write(&path, "[keys\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert_eq!(exit_code(&err), EXIT_USAGE);
    }

    #[test]
    fn test_find_fsroot_walks_up_to_store() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let nested = root.join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_fsroot(&nested), nested);

        // Any open of the store marks the root.
        Keychain::new(&root).link_count().unwrap();
        assert_eq!(find_fsroot(&nested), root);
    }

    #[test]
    fn test_node_key_inherits_from_ancestor() {
        let mut keyring = MemoryKeyring::new();
        let key = Key::random(KeyAlgorithm::Aes256Xts).unwrap();
        keyring.add_key(&key).unwrap();
        keyring
            .set_path_key(Path::new("/mnt/secret"), &key)
            .unwrap();

        let root = Path::new("/mnt");
        let found = node_key(&keyring, Path::new("/mnt/secret/docs/a.txt"), root).unwrap();
        assert_eq!(found.map(|k| k.id()), Some(key.id()));

        let outside = node_key(&keyring, Path::new("/mnt/public/b.txt"), root).unwrap();
        assert!(outside.is_none());
    }
}
