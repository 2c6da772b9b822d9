use std::io::{stdin, stdout};

use llama_embedder::host::{self, HostState};
use llama_embedder::{config, logging, native_messaging, ModelResolver, ResolverConfig};

fn main() {
    if let Err(e) = real_main() {
        eprintln!("[llama-embedder] fatal error: {e:?}");
        log::error!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().skip(1).any(|a| a == "--version" || a == "-V") {
        println!("llama_embedder_host {}", config::HOST_VERSION);
        return Ok(());
    }

    let resolver_config = ResolverConfig::from_env()?;
    let _logger = logging::init_logging(&resolver_config.cache_root)?;

    log::info!("=== Embedding Host Started ===");
    log::info!("Waiting for messages on stdin...");

    let mut state = HostState::new(ModelResolver::new(resolver_config));
    let mut in_stream = stdin();
    let mut out_stream = stdout();

    let mut message_count: u64 = 0;
    loop {
        let req = match native_messaging::read_message(&mut in_stream) {
            Ok(Some(r)) => r,
            Ok(None) => {
                log::info!("No more messages after {} messages, exiting", message_count);
                break;
            }
            Err(e) => {
                log::error!("Error reading message: {:?}", e);
                break;
            }
        };

        message_count += 1;
        log::info!(
            "Processing message #{}: {} (id: {})",
            message_count,
            req.method,
            req.id
        );

        let resp = host::handle_request(&mut state, &req.method, &req.id, &req.params)
            .unwrap_or_else(|e| {
                log::error!("Handler error: {:?}", e);
                host::error_response(&req.id, &e)
            });

        if let Err(e) = native_messaging::write_json(&mut out_stream, &resp) {
            log::error!("Error sending response: {:?}", e);
            break;
        }
        if state.should_exit {
            log::info!("Exiting process as requested by client");
            break;
        }
    }

    log::info!("=== Embedding Host Stopped ===");
    Ok(())
}
