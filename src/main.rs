// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use failure::Fallible;
use log::{info, warn};
use oh_db::{session, tree_server::TreeServer, ConnectionId};
use openssl::nid::Nid;
use openssl::ssl::{Ssl, SslAcceptor, SslFiletype, SslMethod, SslVerifyMode};
use openssl::x509::X509Ref;
use rand::RngCore;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::path::PathBuf;
use std::pin::Pin;
use std::process;
use std::str::FromStr;
use structopt::StructOpt;
use tokio::net::TcpListener;
use tokio_openssl::SslStream;

#[derive(StructOpt, Debug)]
#[structopt(name = "oh_db", about = "The OpenHouse central database.")]
struct Opt {
    /// The address to listen on
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    address: String,

    /// The port to listen on
    #[structopt(short = "p", long = "port", default_value = "8899")]
    port: u16,

    /// The authority chain used to verify client connections
    #[structopt(short = "C", long = "ca-chain", parse(from_os_str))]
    ca_chain: PathBuf,

    /// The certificate to present to client connections
    #[structopt(short = "c", long = "certificate", parse(from_os_str))]
    certificate: PathBuf,

    /// The private key matching the certificate
    #[structopt(short = "k", long = "private-key", parse(from_os_str))]
    private_key: PathBuf,

    /// The logging level
    #[structopt(short = "l", long = "log-level", default_value = "INFO")]
    log_level: String,

    /// Log to the given file instead of the terminal
    #[structopt(short = "L", long = "log-target", parse(from_os_str))]
    log_target: Option<PathBuf>,
}

fn main() {
    let opt = Opt::from_args();
    if let Err(e) = run(opt) {
        eprintln!("oh_db: {}", e);
        process::exit(1);
    }
}

#[tokio::main]
async fn run(opt: Opt) -> Fallible<()> {
    let level = simplelog::LevelFilter::from_str(&opt.log_level)?;
    match &opt.log_target {
        Some(path) => WriteLogger::init(level, Config::default(), File::create(path)?)?,
        None => TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )?,
    }

    info!("oh_db {}", env!("CARGO_PKG_VERSION"));
    info!("using {}", openssl::version::version());

    let acceptor = build_acceptor(&opt)?;
    let listener = TcpListener::bind((opt.address.as_str(), opt.port)).await?;
    info!("listening on {}:{}", opt.address, opt.port);

    let server = TreeServer::launch();
    let mut last_connection_id = 0u64;
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        };
        let (tcp, peer) = accepted;
        last_connection_id += 1;
        let conn = ConnectionId::from_u64(last_connection_id);
        let mailbox = server.mailbox();
        let ssl = Ssl::new(acceptor.context())?;
        tokio::spawn(async move {
            let mut stream = match SslStream::new(ssl, tcp) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("session {}: ssl setup failed: {}", conn, e);
                    return;
                }
            };
            if let Err(e) = Pin::new(&mut stream).accept().await {
                warn!("session {}: tls handshake with {} failed: {}", conn, peer, e);
                return;
            }
            let identity = stream
                .ssl()
                .peer_certificate()
                .and_then(|cert| peer_common_name(&cert))
                .unwrap_or_else(|| "<no common name>".to_owned());
            info!("session {}: {} connected from {}", conn, identity, peer);
            if let Err(e) = session::run(stream, conn, mailbox).await {
                warn!("session {}: terminated: {}", conn, e);
            }
        });
    }

    server.mailbox().finish().await?;
    server.join().await?;
    Ok(())
}

fn build_acceptor(opt: &Opt) -> Fallible<SslAcceptor> {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;

    // Set our certificate paths: trust is rooted at our CA.
    builder.set_ca_file(&opt.ca_chain)?;
    builder.set_certificate_chain_file(&opt.certificate)?;
    builder.set_private_key_file(&opt.private_key, SslFiletype::PEM)?;
    builder.check_private_key()?;

    // Verify peer certificates.
    builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);

    // Must be set for client certificate verification.
    let mut session_ctx = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut session_ctx);
    builder.set_session_id_context(&session_ctx)?;

    Ok(builder.build())
}

fn peer_common_name(cert: &X509Ref) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|name| name.to_string())
}
