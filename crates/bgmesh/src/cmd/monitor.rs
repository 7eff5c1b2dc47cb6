use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use bgmesh_client::{ClientConfig, ClientError, Delivery};
use tracing::info;

use crate::cmd::{parse_duration, MonitorArgs};
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_delivery, print_record, OutputFormat};

const HELLO: &str = "system_hello";

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let poll_interval = parse_duration(&args.poll_interval)?;
    let duration = args.duration.as_deref().map(parse_duration).transpose()?;

    let registry = args.registry.load()?;
    let config = ClientConfig::default().with_poll_interval(poll_interval);
    let mut client = args.endpoint.connect(registry, config, timeout)?;
    let deliveries = client.subscribe();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    if args.hello {
        let response = client
            .command_named(HELLO, Vec::new())
            .map_err(|err| client_error("hello failed", err))?;
        print_record(&response, format);
    }

    let started = Instant::now();
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        if print_pending(&deliveries, format, &mut printed, args.count) {
            return Ok(SUCCESS);
        }
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        match client.poll() {
            Ok(_) => {}
            Err(ClientError::Disconnected) => {
                info!("NCP closed the link");
                print_pending(&deliveries, format, &mut printed, args.count);
                break;
            }
            Err(err) => return Err(client_error("receive failed", err)),
        }
    }

    Ok(SUCCESS)
}

/// Print queued deliveries. Returns true once `count` is reached.
fn print_pending(
    deliveries: &mpsc::Receiver<Delivery>,
    format: OutputFormat,
    printed: &mut usize,
    count: Option<usize>,
) -> bool {
    for delivery in deliveries.try_iter() {
        print_delivery(&delivery, format);
        *printed = printed.saturating_add(1);
        if count.is_some_and(|count| *printed >= count) {
            return true;
        }
    }
    false
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
