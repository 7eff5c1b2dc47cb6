use data_encoding::HEXLOWER;

use crate::cmd::{parse_json_arg, EncodeArgs};
use crate::exit::{frame_error, registry_error, CliResult, SUCCESS};
use crate::output::{print_envelope, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = args.registry.load()?;
    let json = parse_json_arg(args.json.as_deref())?;

    let record = registry
        .record_from_json(args.kind.into(), &args.name, &json)
        .map_err(|err| registry_error("encode failed", err))?;
    let envelope = registry
        .encode(&record)
        .map_err(|err| registry_error("encode failed", err))?;
    let wire = envelope
        .encode()
        .map_err(|err| frame_error("encode failed", err))?;

    print_envelope(&record, &HEXLOWER.encode(&wire), wire.len(), format);
    Ok(SUCCESS)
}
