//! docseal - command-line interface
//!
//! Signs, verifies and inspects PDF documents against a local vault
//! directory holding JSON snapshots of every table.

use std::path::{Path, PathBuf};
use std::process;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{Arg, ArgAction, ArgMatches, Command};
use docseal::config::Config;
use docseal::encryption::decrypt_identity_payload;
use docseal::error::{Error, Result};
use docseal::pipeline::{SealingService, SigningRequest, VerificationRequest};
use docseal::types::{DocumentSource, IdentityClaim, RequestHeaders};
use docseal::Logger;
use serde_json::json;
use tracing::{error, info};

const SECRET_ENV: &str = "DOCSEAL_SERVER_SECRET";
const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let level = matches
        .get_one::<String>("verbose")
        .map(String::as_str)
        .unwrap_or("info");
    Logger::with_level(level).init();

    if let Err(e) = run(&matches).await {
        error!(error = %e, "command failed");
        eprintln!("error: {}", e);
        process::exit(if e.is_rejection() { 2 } else { 1 });
    }
}

async fn run(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches.get_one::<String>("config").map(Path::new))?;
    let vault = matches
        .get_one::<String>("vault")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("vault"));
    let service = SealingService::open(config, &vault).await?;

    match matches.subcommand() {
        Some(("sign", args)) => sign(&service, args, &vault).await,
        Some(("verify", args)) => verify(&service, args, &vault).await,
        Some(("inspect", args)) => inspect(&service, args).await,
        Some(("device-check", args)) => device_check(&service, args, &vault).await,
        _ => Err(Error::ValidationError("no subcommand given".into())),
    }
}

fn build_cli() -> Command {
    Command::new("docseal")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Signs PDF documents and verifies them from QR tokens")
        .subcommand_required(true)
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .global(true)
            .help("YAML configuration file"))
        .arg(Arg::new("vault")
            .long("vault")
            .value_name("DIR")
            .global(true)
            .help("Directory holding table snapshots (default: ./vault)"))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .value_name("LEVEL")
            .global(true)
            .value_parser(LOG_LEVELS)
            .help("Logging verbosity; RUST_LOG takes precedence"))
        .subcommand(Command::new("sign")
            .about("Run the full signing pipeline on a PDF")
            .arg(Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .required(true)
                .help("PDF to sign"))
            .args(identity_args())
            .args(request_args())
            .arg(Arg::new("date")
                .long("date")
                .value_name("TEXT")
                .help("Signature date shown on the stamp"))
            .arg(Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Where to write the sanitized copy for stamping")))
        .subcommand(Command::new("verify")
            .about("Verify a document from its QR token")
            .arg(Arg::new("token")
                .long("token")
                .value_name("TOKEN")
                .required(true))
            .arg(Arg::new("zk")
                .long("zk")
                .value_name("TOKEN"))
            .args(identity_args()))
        .subcommand(Command::new("inspect")
            .about("Run intake validation and the copy-paste battery")
            .arg(Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .required(true)))
        .subcommand(Command::new("device-check")
            .about("Fingerprint a request and report device trust")
            .args(identity_args())
            .args(request_args())
            .arg(Arg::new("register")
                .long("register")
                .action(ArgAction::SetTrue)
                .help("Register the device when unknown")))
}

fn identity_args() -> Vec<Arg> {
    vec![
        Arg::new("identity")
            .long("identity")
            .value_name("FILE")
            .help("JSON identity claim"),
        Arg::new("encrypted-identity")
            .long("encrypted-identity")
            .value_name("FILE")
            .conflicts_with("identity")
            .requires("passphrase")
            .help("base64 AES-256-GCM identity payload"),
        Arg::new("passphrase")
            .long("passphrase")
            .value_name("TEXT")
            .help("Passphrase of the encrypted identity payload"),
    ]
}

fn request_args() -> Vec<Arg> {
    vec![
        Arg::new("ip")
            .long("ip")
            .value_name("ADDR")
            .default_value("127.0.0.1"),
        Arg::new("user-agent")
            .long("user-agent")
            .value_name("TEXT"),
        Arg::new("header")
            .long("header")
            .value_name("NAME:VALUE")
            .action(ArgAction::Append)
            .help("Extra request header, repeatable"),
    ]
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let secret = std::env::var(SECRET_ENV).map_err(|_| {
                Error::ConfigError(format!("pass --config or set {}", SECRET_ENV))
            })?;
            let config = Config::with_secret(secret);
            config.validate()?;
            Ok(config)
        }
    }
}

async fn read_identity(args: &ArgMatches) -> Result<Option<IdentityClaim>> {
    if let Some(path) = args.get_one::<String>("identity") {
        let raw = tokio::fs::read(path).await?;
        return Ok(Some(serde_json::from_slice(&raw)?));
    }
    if let Some(path) = args.get_one::<String>("encrypted-identity") {
        let raw = tokio::fs::read_to_string(path).await?;
        let data = BASE64
            .decode(raw.trim())
            .map_err(|e| Error::ValidationError(format!("identity payload is not base64: {}", e)))?;
        let passphrase = args
            .get_one::<String>("passphrase")
            .map(String::as_str)
            .unwrap_or_default();
        return Ok(Some(decrypt_identity_payload(&data, passphrase.as_bytes())?));
    }
    Ok(None)
}

async fn require_identity(args: &ArgMatches) -> Result<IdentityClaim> {
    read_identity(args)
        .await?
        .ok_or_else(|| Error::ValidationError("an identity claim is required".into()))
}

fn read_headers(args: &ArgMatches) -> RequestHeaders {
    let ip = args
        .get_one::<String>("ip")
        .map(String::as_str)
        .unwrap_or("127.0.0.1");
    let extra = args
        .get_many::<String>("header")
        .into_iter()
        .flatten()
        .filter_map(|h| h.split_once(':'));
    let mut headers = RequestHeaders::from_pairs(ip, extra);
    if let Some(agent) = args.get_one::<String>("user-agent") {
        headers.user_agent = Some(agent.clone());
    }
    headers
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn sign(service: &SealingService, args: &ArgMatches, vault: &Path) -> Result<()> {
    let input = args
        .get_one::<String>("input")
        .map(PathBuf::from)
        .ok_or_else(|| Error::ValidationError("--input is required".into()))?;
    let request = SigningRequest {
        source: DocumentSource::from_path(&input).await?,
        identity: require_identity(args).await?,
        headers: read_headers(args),
        signed_at: args.get_one::<String>("date").cloned(),
    };

    // Keep the vault consistent with whatever stages committed
    let outcome = service.sign(request).await;
    service.save(vault).await?;
    let receipt = outcome?;

    if let Some(output) = args.get_one::<String>("output") {
        tokio::fs::write(output, &receipt.stamp_source).await?;
        info!(output = %output, "stamping copy written");
    }
    print_json(&receipt)
}

async fn verify(service: &SealingService, args: &ArgMatches, vault: &Path) -> Result<()> {
    let request = VerificationRequest {
        token: args.get_one::<String>("token").cloned().unwrap_or_default(),
        zk_token: args.get_one::<String>("zk").cloned(),
        identity: read_identity(args).await?,
    };
    let outcome = service.verify(&request)?;
    service.save(vault).await?;
    print_json(&outcome)
}

async fn inspect(service: &SealingService, args: &ArgMatches) -> Result<()> {
    let input = args
        .get_one::<String>("input")
        .map(PathBuf::from)
        .ok_or_else(|| Error::ValidationError("--input is required".into()))?;
    let source = DocumentSource::from_path(&input).await?;
    print_json(&service.inspect(&source)?)
}

async fn device_check(service: &SealingService, args: &ArgMatches, vault: &Path) -> Result<()> {
    let identity = require_identity(args).await?;
    let headers = read_headers(args);
    let devices = service.devices();

    let fingerprint = devices.fingerprint(&headers)?;
    let mut trust = devices.check_trust(&identity.employee_id, &fingerprint);
    let mut registered = None;
    if !trust.is_trusted() && args.get_flag("register") {
        let context = docseal::device::RegistrationContext {
            ip_address: headers.ip_address.clone(),
            user_agent: headers.user_agent.clone(),
            timestamp: chrono::Utc::now(),
            registration_method: "cli".to_string(),
            document_type: None,
            entity: identity.entity.clone(),
        };
        registered = Some(devices.register(&identity.employee_id, &fingerprint, &context)?);
        trust = devices.check_trust(&identity.employee_id, &fingerprint);
    }
    let indicators = devices.detect_suspicious_activity(&identity.employee_id, &fingerprint, &headers)?;
    service.save(vault).await?;

    let (trusted, reason, action) = match &trust {
        docseal::device::TrustCheck::Trusted { .. } => (true, None, None),
        docseal::device::TrustCheck::Untrusted { reason, .. } => {
            (false, Some(reason.as_str()), Some(reason.action()))
        }
    };
    print_json(&json!({
        "fingerprint": fingerprint.as_str(),
        "trusted": trusted,
        "reason": reason,
        "action": action,
        "registered_device": registered,
        "indicators": indicators,
    }))
}
