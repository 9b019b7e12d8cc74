mod auth;
mod config;
mod db;
mod ipc;
mod ledger;

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

use ipc::AppState;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cfg = config::Config::from_env()?;

    match cfg.port {
        Some(port) => serve_tcp(cfg, port),
        None => serve_stdio(cfg),
    }
}

fn serve_stdio(cfg: config::Config) -> anyhow::Result<()> {
    let conn = db::open_db(&cfg.db_path)?;
    log::info!("serving on stdio, db at {}", cfg.db_path.display());
    let mut state = AppState { cfg, db: conn };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    serve(&mut state, stdin.lock(), &mut stdout);
    Ok(())
}

fn serve_tcp(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    log::info!(
        "listening on 127.0.0.1:{}, db at {}",
        port,
        cfg.db_path.display()
    );

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::error!("accept failed: {e}");
                continue;
            }
        };
        let cfg = cfg.clone();
        std::thread::spawn(move || serve_connection(cfg, stream));
    }
    Ok(())
}

// Each connection gets its own SQLite connection; concurrent upserts on the
// same key are last-write-wins.
fn serve_connection(cfg: config::Config, stream: TcpStream) {
    let conn = match db::open_db(&cfg.db_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("db open failed: {e:?}");
            return;
        }
    };
    let reader = match stream.try_clone() {
        Ok(s) => BufReader::new(s),
        Err(e) => {
            log::error!("stream clone failed: {e}");
            return;
        }
    };
    let mut state = AppState { cfg, db: conn };
    let mut writer = stream;
    serve(&mut state, reader, &mut writer);
}

fn serve<R: BufRead, W: Write>(state: &mut AppState, reader: R, writer: &mut W) {
    for line in reader.lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply with an id we never parsed.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(writer, "{}", resp);
                let _ = writer.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(state, req);
        let _ = writeln!(
            writer,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = writer.flush();
    }
}
