use bgmesh_frame::MessageKind;

use crate::cmd::OpcodesArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_entries, OutputFormat};

pub fn run(args: OpcodesArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = args.registry.load()?;
    let kind = args.kind.map(MessageKind::from);

    let entries: Vec<_> = registry
        .entries()
        .into_iter()
        .filter(|entry| kind.is_none_or(|kind| entry.kind == kind))
        .filter(|entry| {
            args.family
                .as_deref()
                .is_none_or(|family| entry.family == family)
        })
        .collect();

    print_entries(&entries, format);
    Ok(SUCCESS)
}
