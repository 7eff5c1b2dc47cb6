use bgmesh_frame::{Envelope, MessageKind};
use data_encoding::HEXLOWER_PERMISSIVE;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, registry_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_record, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)?;
    let envelope = Envelope::decode(&bytes).map_err(|err| frame_error("decode failed", err))?;
    let registry = args.registry.load()?;

    // Commands and responses share identifiers; without --kind a
    // non-event is read as the response coming back from the NCP.
    let kind = args
        .kind
        .map(MessageKind::from)
        .unwrap_or_else(|| envelope.opcode.incoming_kind());
    let record = registry
        .decode(kind, &envelope)
        .map_err(|err| registry_error("decode failed", err))?;

    print_record(&record, format);
    Ok(SUCCESS)
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let compact: String = input.split_whitespace().collect();
    let digits = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    HEXLOWER_PERMISSIVE
        .decode(digits.as_bytes())
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex input: {err}")))
}
