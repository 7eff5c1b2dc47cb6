use bgmesh_client::{ClientConfig, Delivery, RequestFailure};
use bgmesh_frame::MessageKind;
use tracing::{debug, info};

use crate::cmd::{parse_duration, parse_json_arg, RequestArgs};
use crate::exit::{client_error, registry_error, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_delivery, OutputFormat};

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let wait = parse_duration(&args.wait)?;
    let json = parse_json_arg(args.json.as_deref())?;

    let registry = args.registry.load()?;
    let record = registry
        .record_from_json(MessageKind::Command, &args.name, &json)
        .map_err(|err| registry_error("request failed", err))?;

    let config = ClientConfig::default().with_request_timeout(wait);
    let mut client = args.endpoint.connect(registry, config, timeout)?;
    let deliveries = client.subscribe();

    let handle = client
        .request(&record)
        .map_err(|err| client_error("request failed", err))?;
    info!(handle, request = %record.name, "request accepted");

    // The correlation deadline guarantees a conclusion for the handle.
    loop {
        for delivery in deliveries.try_iter() {
            match &delivery {
                Delivery::Concluded(conclusion) if conclusion.handle == handle => {
                    print_delivery(&delivery, format);
                    return Ok(match &conclusion.outcome {
                        Ok(_) => SUCCESS,
                        Err(RequestFailure::Stack { .. }) => FAILURE,
                        Err(RequestFailure::Timeout { .. }) => TIMEOUT,
                    });
                }
                other => debug!(?other, "unrelated delivery"),
            }
        }
        client
            .poll()
            .map_err(|err| client_error("receive failed", err))?;
    }
}
