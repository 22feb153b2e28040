//! Command-line front end for registering and verifying content fingerprints.
//!
//! This binary is the only place that reads the process environment
//! (`PRIVATE_KEY`, `INFURA_API_KEY`, `PROVEIT_CONFIG`, `HOME`, `RUST_LOG`); the
//! library takes explicit configuration only.

use proveit::config::{default_path_in, CONFIG_KEYS};
#[cfg(feature = "devnet")]
use proveit::devnet::{run_devnet_server, DevnetChain, DevnetConfig, DevnetServerConfig};
use proveit::ledger::SigningIdentity;
use proveit::{
    fingerprint_of_file, fingerprint_of_reader, render_json, render_text, write_record,
    BatchOutcome, CertificateSource, ClientOptions, DescribeFields, NetworkIdentity, ProveIt,
    Subject, UserConfig,
};
use rpassword::prompt_password;
#[cfg(feature = "devnet")]
use std::net::SocketAddr;
#[cfg(feature = "devnet")]
use std::sync::Arc;
use std::time::Duration;
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};
use tracing_subscriber::EnvFilter;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: proveit <command> [options]");
    println!();
    println!("Commands:");
    println!("  hash <file|->...                      print SHA-256 fingerprints");
    println!("  register <file> [--metadata <text>] [--certificate <path>]");
    println!("  register-hash <hash> [--metadata <text>] [--certificate <path>]");
    println!("  verify <file> [--output <path>] [--certificate <path>] [--json]");
    println!("  verify-hash <hash> [--output <path>] [--certificate <path>] [--json]");
    println!("  batch-verify <file>... [--list <file>] [--strict] [--json]");
    println!("  certificate <hash> | --file <path>  [--output <path>] [--file-name <name>]");
    println!("  config [show|path|set <key> <value>|unset <key>]");
    #[cfg(feature = "devnet")]
    println!("  devnet [--listen <addr>] [--chain-id <id>]");
    println!();
    print_common_help();
}

fn print_common_help() {
    println!("Common options:");
    println!(
        "  --network <name>      mainnet, goerli, polygon, polygonMumbai, localhost (alias hardhat)"
    );
    println!("  --rpc-url <url>       RPC endpoint override");
    println!("  --contract <address>  registry contract override");
    println!("  --deployments <dir>   deployment registry root (default ./deployments)");
    println!("  --key-file <path>     signing key file (hex or 32 raw bytes)");
    println!("  --prompt-key          read the signing key from the terminal");
    println!("  --timeout <secs>      confirmation wait bound");
    println!("  --config <path>       configuration file (default ~/.proveit/config.json)");
    println!();
    println!("Environment: PRIVATE_KEY, INFURA_API_KEY, PROVEIT_CONFIG, RUST_LOG");
}

fn print_config_help() {
    println!("Usage: proveit config [show|path|set <key> <value>|unset <key>] [--config <path>]");
    println!("Keys: {}", CONFIG_KEYS.join(", "));
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let mut args = env::args().skip(1);
    let command = args.next();
    let tail: Vec<String> = args.collect();
    match command.as_deref() {
        Some("hash") => cmd_hash(tail),
        Some("register") => cmd_register(tail, false),
        Some("register-hash") => cmd_register(tail, true),
        Some("verify") => cmd_verify(tail, false),
        Some("verify-hash") => cmd_verify(tail, true),
        Some("batch-verify") => cmd_batch_verify(tail),
        Some("certificate") => cmd_certificate(tail),
        Some("config") => cmd_config(tail),
        #[cfg(feature = "devnet")]
        Some("devnet") => cmd_devnet(tail),
        Some("--version") | Some("-V") => println!("proveit {}", env!("CARGO_PKG_VERSION")),
        Some("help") | Some("--help") | Some("-h") | None => print_help(),
        Some(other) => {
            eprintln!("unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

/// Flags shared by every command that talks to a ledger.
#[derive(Debug, Default)]
struct CommonArgs {
    network: Option<NetworkIdentity>,
    rpc_url: Option<String>,
    contract: Option<String>,
    deployments: Option<PathBuf>,
    key_file: Option<PathBuf>,
    prompt_key: bool,
    timeout_secs: Option<u64>,
    config: Option<PathBuf>,
}

impl CommonArgs {
    /// Consumes `flag` (and its value) if it is a common option.
    fn accept(&mut self, flag: &str, iter: &mut impl Iterator<Item = String>) -> bool {
        let mut value = |name: &str| {
            iter.next()
                .unwrap_or_else(|| fatal(&format!("{name} expects a value")))
        };
        match flag {
            "--network" | "-n" => {
                let raw = value(flag);
                let network = raw
                    .parse::<NetworkIdentity>()
                    .unwrap_or_else(|err| fatal(&format!("{err}")));
                self.network = Some(network);
            }
            "--rpc-url" => self.rpc_url = Some(value(flag)),
            "--contract" => self.contract = Some(value(flag)),
            "--deployments" => self.deployments = Some(PathBuf::from(value(flag))),
            "--key-file" => self.key_file = Some(PathBuf::from(value(flag))),
            "--prompt-key" => self.prompt_key = true,
            "--timeout" => {
                let raw = value(flag);
                self.timeout_secs = Some(
                    raw.parse().unwrap_or_else(|_| {
                        fatal(&format!("--timeout expects seconds, got '{raw}'"))
                    }),
                );
            }
            "--config" => self.config = Some(PathBuf::from(value(flag))),
            _ => return false,
        }
        true
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| env_value("PROVEIT_CONFIG").map(PathBuf::from))
            .or_else(|| env_value("HOME").map(|home| default_path_in(Path::new(&home))))
    }

    fn user_config(&self) -> UserConfig {
        match self.config_path() {
            Some(path) => UserConfig::load(&path).unwrap_or_else(|err| fatal(&format!("{err}"))),
            None => UserConfig::default(),
        }
    }

    fn signer(&self) -> Option<SigningIdentity> {
        if let Some(path) = &self.key_file {
            return Some(
                SigningIdentity::from_file(path)
                    .unwrap_or_else(|err| fatal(&format!("failed to load key: {err}"))),
            );
        }
        if self.prompt_key {
            let entered = prompt_password("Private key: ")
                .unwrap_or_else(|err| fatal(&format!("failed to read private key: {err}")));
            return Some(
                SigningIdentity::from_hex(&entered)
                    .unwrap_or_else(|err| fatal(&format!("failed to load key: {err}"))),
            );
        }
        env_value("PRIVATE_KEY").map(|hex| {
            SigningIdentity::from_hex(&hex)
                .unwrap_or_else(|err| fatal(&format!("PRIVATE_KEY is not a valid key: {err}")))
        })
    }

    fn options(&self, with_signer: bool) -> ClientOptions {
        let mut opts = self.user_config().to_options();
        if let Some(network) = self.network {
            opts.network = network;
        }
        if self.rpc_url.is_some() {
            opts.overrides.rpc_url = self.rpc_url.clone();
        }
        if self.contract.is_some() {
            opts.overrides.contract_address = self.contract.clone();
        }
        if self.deployments.is_some() {
            opts.overrides.deployments_dir = self.deployments.clone();
        }
        opts.overrides.api_key = env_value("INFURA_API_KEY");
        if let Some(secs) = self.timeout_secs {
            opts.settings.confirmation.timeout = Duration::from_secs(secs);
        }
        if with_signer {
            opts.signer = self.signer();
        }
        opts
    }

    fn open(&self, with_signer: bool) -> ProveIt {
        ProveIt::open(self.options(with_signer))
            .unwrap_or_else(|err| fatal(&format!("failed to connect: {err}")))
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn print_record(record: &dyn DescribeFields, json: bool) {
    if json {
        let rendered = serde_json::to_string_pretty(&render_json(record))
            .unwrap_or_else(|err| fatal(&format!("failed to encode output: {err}")));
        println!("{rendered}");
    } else {
        print!("{}", render_text(record));
    }
}

fn save_record(record: &dyn DescribeFields, path: &Path, what: &str) {
    let written = write_record(record, path)
        .unwrap_or_else(|err| fatal(&format!("failed to write {what}: {err}")));
    println!("{what} saved to: {}", written.display());
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn cmd_hash(args: Vec<String>) {
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        println!("Usage: proveit hash <file|->...");
        return;
    }
    for arg in args {
        let fingerprint = if arg == "-" {
            fingerprint_of_reader(io::stdin().lock())
        } else {
            fingerprint_of_file(&arg)
        }
        .unwrap_or_else(|err| fatal(&format!("{err}")));
        println!("{fingerprint}  {arg}");
    }
}

fn cmd_register(args: Vec<String>, raw_hash: bool) {
    let usage = if raw_hash {
        "Usage: proveit register-hash <hash> [--metadata <text>] [--certificate <path>]"
    } else {
        "Usage: proveit register <file> [--metadata <text>] [--certificate <path>]"
    };
    let mut common = CommonArgs::default();
    let mut target: Option<String> = None;
    let mut metadata = String::new();
    let mut certificate: Option<PathBuf> = None;
    let mut json = false;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if common.accept(&arg, &mut iter) {
            continue;
        }
        match arg.as_str() {
            "--metadata" | "-m" => {
                metadata = iter
                    .next()
                    .unwrap_or_else(|| fatal("--metadata expects a value"));
            }
            "--certificate" | "--output" | "-o" => {
                certificate = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--certificate expects a path")),
                ));
            }
            "--json" => json = true,
            "-h" | "--help" => {
                println!("{usage}");
                print_common_help();
                return;
            }
            value if target.is_none() && !value.starts_with("--") => {
                target = Some(value.to_string())
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let target = target.unwrap_or_else(|| fatal(usage));
    let subject = if raw_hash {
        Subject::Hash(target.clone())
    } else {
        Subject::File(PathBuf::from(&target))
    };
    // Validate locally before connecting.
    subject
        .fingerprint()
        .unwrap_or_else(|err| fatal(&format!("{err}")));

    let prove = common.open(true);
    let record = prove
        .register(&subject, &metadata)
        .unwrap_or_else(|err| fatal(&format!("registration failed: {err}")));
    print_record(&record, json);

    if let Some(path) = certificate {
        let mut cert = prove
            .make_certificate(CertificateSource::Registration(&record))
            .unwrap_or_else(|err| fatal(&format!("{err}")));
        if !raw_hash {
            if let Some(name) = file_name_of(Path::new(&target)) {
                cert = cert.with_source_name(name);
            }
        }
        save_record(&cert, &path, "certificate");
    }
}

fn cmd_verify(args: Vec<String>, raw_hash: bool) {
    let usage = if raw_hash {
        "Usage: proveit verify-hash <hash> [--output <path>] [--certificate <path>] [--json]"
    } else {
        "Usage: proveit verify <file> [--output <path>] [--certificate <path>] [--json]"
    };
    let mut common = CommonArgs::default();
    let mut target: Option<String> = None;
    let mut output: Option<PathBuf> = None;
    let mut certificate: Option<PathBuf> = None;
    let mut json = false;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if common.accept(&arg, &mut iter) {
            continue;
        }
        match arg.as_str() {
            "--hash" if raw_hash => {
                target = Some(iter.next().unwrap_or_else(|| fatal("--hash expects a value")));
            }
            "--output" | "-o" => {
                output = Some(PathBuf::from(
                    iter.next().unwrap_or_else(|| fatal("--output expects a path")),
                ));
            }
            "--certificate" => {
                certificate = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--certificate expects a path")),
                ));
            }
            "--json" => json = true,
            "-h" | "--help" => {
                println!("{usage}");
                print_common_help();
                return;
            }
            value if target.is_none() && !value.starts_with("--") => {
                target = Some(value.to_string())
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let target = target.unwrap_or_else(|| fatal(usage));
    let subject = if raw_hash {
        Subject::Hash(target.clone())
    } else {
        Subject::File(PathBuf::from(&target))
    };
    subject
        .fingerprint()
        .unwrap_or_else(|err| fatal(&format!("{err}")));

    let prove = common.open(false);
    let record = prove
        .verify(&subject)
        .unwrap_or_else(|err| fatal(&format!("verification failed: {err}")));
    print_record(&record, json);

    if let Some(path) = output {
        save_record(&record, &path, "verification result");
    }
    if let Some(path) = certificate {
        if !record.is_registered() {
            fatal("not registered; no certificate written");
        }
        let mut cert = prove
            .make_certificate(CertificateSource::Verification(&record))
            .unwrap_or_else(|err| fatal(&format!("{err}")));
        if !raw_hash {
            if let Some(name) = file_name_of(Path::new(&target)) {
                cert = cert.with_source_name(name);
            }
        }
        save_record(&cert, &path, "certificate");
    }
}

fn cmd_batch_verify(args: Vec<String>) {
    let mut common = CommonArgs::default();
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut strict = false;
    let mut json = false;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if common.accept(&arg, &mut iter) {
            continue;
        }
        match arg.as_str() {
            "--list" => {
                let list = iter.next().unwrap_or_else(|| fatal("--list expects a path"));
                let contents = fs::read_to_string(&list)
                    .unwrap_or_else(|err| fatal(&format!("failed to read {list}: {err}")));
                paths.extend(
                    contents
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty() && !line.starts_with('#'))
                        .map(PathBuf::from),
                );
            }
            "--strict" => strict = true,
            "--json" => json = true,
            "-h" | "--help" => {
                println!(
                    "Usage: proveit batch-verify <file>... [--list <file>] [--strict] [--json]"
                );
                print_common_help();
                return;
            }
            value if !value.starts_with("--") => paths.push(PathBuf::from(value)),
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    if paths.is_empty() {
        fatal("batch-verify expects at least one file");
    }

    let prove = common.open(false);
    let outcomes = prove
        .batch_verify_detailed(paths.as_slice())
        .unwrap_or_else(|err| fatal(&format!("batch verification failed: {err}")));

    let mut missing = 0usize;
    let mut rendered = Vec::with_capacity(outcomes.len());
    for (path, outcome) in paths.iter().zip(outcomes) {
        if matches!(outcome, BatchOutcome::Missing(_)) {
            missing += 1;
        }
        let record = outcome.into_record();
        if json {
            let mut value = render_json(&record);
            value["path"] = serde_json::Value::String(path.display().to_string());
            rendered.push(value);
        } else if record.fingerprint.is_none() {
            println!("{}: missing", path.display());
        } else if let Some(reg) = &record.registration {
            println!(
                "{}: registered {} owner={} at={}",
                path.display(),
                record.fingerprint_string(),
                reg.owner,
                proveit::certificate::iso_timestamp(&reg.timestamp)
            );
        } else {
            println!(
                "{}: not registered {}",
                path.display(),
                record.fingerprint_string()
            );
        }
    }
    if json {
        let text = serde_json::to_string_pretty(&rendered)
            .unwrap_or_else(|err| fatal(&format!("failed to encode output: {err}")));
        println!("{text}");
    }
    if strict && missing > 0 {
        fatal(&format!("{missing} file(s) missing"));
    }
}

fn cmd_certificate(args: Vec<String>) {
    let usage =
        "Usage: proveit certificate <hash> | --file <path>  [--output <path>] [--file-name <name>]";
    let mut common = CommonArgs::default();
    let mut hash: Option<String> = None;
    let mut file: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut file_name: Option<String> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if common.accept(&arg, &mut iter) {
            continue;
        }
        match arg.as_str() {
            "--hash" => hash = Some(iter.next().unwrap_or_else(|| fatal("--hash expects a value"))),
            "--file" => {
                file = Some(PathBuf::from(
                    iter.next().unwrap_or_else(|| fatal("--file expects a path")),
                ));
            }
            "--output" | "-o" => {
                output = Some(PathBuf::from(
                    iter.next().unwrap_or_else(|| fatal("--output expects a path")),
                ));
            }
            "--file-name" => {
                let name = iter
                    .next()
                    .unwrap_or_else(|| fatal("--file-name expects a value"));
                file_name = Some(name);
            }
            "-h" | "--help" => {
                println!("{usage}");
                print_common_help();
                return;
            }
            value if hash.is_none() && !value.starts_with("--") => hash = Some(value.to_string()),
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    let hash = match (&hash, &file) {
        (Some(h), None) => h.clone(),
        (None, Some(path)) => {
            if file_name.is_none() {
                file_name = file_name_of(path);
            }
            fingerprint_of_file(path)
                .unwrap_or_else(|err| fatal(&format!("{err}")))
                .to_string()
        }
        _ => fatal(usage),
    };

    let prove = common.open(false);
    let mut cert = prove
        .make_certificate(CertificateSource::Hash(&hash))
        .unwrap_or_else(|err| fatal(&format!("{err}")));
    if let Some(name) = file_name {
        cert = cert.with_source_name(name);
    }
    match output {
        Some(path) => save_record(&cert, &path, "certificate"),
        None => print_record(&cert, false),
    }
}

fn cmd_config(args: Vec<String>) {
    let mut common = CommonArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if common.accept(&arg, &mut iter) {
            continue;
        }
        match arg.as_str() {
            "-h" | "--help" => {
                print_config_help();
                return;
            }
            _ => positional.push(arg),
        }
    }
    let path = common
        .config_path()
        .unwrap_or_else(|| fatal("no configuration path: set HOME, PROVEIT_CONFIG, or --config"));

    match positional.first().map(String::as_str) {
        None | Some("show") => {
            let cfg = common.user_config();
            println!("Configuration ({})", path.display());
            for (key, value) in cfg.entries() {
                println!("  {key}: {}", value.as_deref().unwrap_or("(unset)"));
            }
        }
        Some("path") => println!("{}", path.display()),
        Some("set") => {
            let (key, value) = match (positional.get(1), positional.get(2)) {
                (Some(k), Some(v)) => (k, v),
                _ => fatal("Usage: proveit config set <key> <value>"),
            };
            let mut cfg = common.user_config();
            cfg.set(key, Some(value.as_str()))
                .unwrap_or_else(|err| fatal(&format!("{err}")));
            cfg.save(&path)
                .unwrap_or_else(|err| fatal(&format!("failed to save config: {err}")));
            println!("{key} set to: {value}");
        }
        Some("unset") => {
            let key = positional
                .get(1)
                .unwrap_or_else(|| fatal("Usage: proveit config unset <key>"));
            let mut cfg = common.user_config();
            cfg.set(key, None)
                .unwrap_or_else(|err| fatal(&format!("{err}")));
            cfg.save(&path)
                .unwrap_or_else(|err| fatal(&format!("failed to save config: {err}")));
            println!("{key} cleared");
        }
        Some(other) => {
            eprintln!("unknown config action: {other}");
            print_config_help();
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "devnet")]
fn cmd_devnet(args: Vec<String>) {
    let mut listen: SocketAddr = "127.0.0.1:8545"
        .parse()
        .unwrap_or_else(|err| fatal(&format!("invalid default listen address: {err}")));
    let mut config = DevnetConfig::default();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--listen" => {
                let raw = iter.next().unwrap_or_else(|| fatal("--listen expects an address"));
                listen = raw
                    .parse()
                    .unwrap_or_else(|err| fatal(&format!("invalid listen address '{raw}': {err}")));
            }
            "--chain-id" => {
                let raw = iter.next().unwrap_or_else(|| fatal("--chain-id expects a value"));
                config.chain_id = raw
                    .parse()
                    .unwrap_or_else(|_| fatal(&format!("invalid chain id '{raw}'")));
            }
            "-h" | "--help" => {
                println!("Usage: proveit devnet [--listen <addr>] [--chain-id <id>]");
                return;
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    let chain = Arc::new(DevnetChain::new(config));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| fatal(&format!("failed to start runtime: {err}")));
    runtime.block_on(async move {
        tokio::select! {
            res = run_devnet_server(DevnetServerConfig::new(listen), chain) => {
                if let Err(err) = res {
                    fatal(&format!("devnet error: {err}"));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("QSYS|mod=DEVNET|evt=SHUTDOWN");
            }
        }
    });
}
