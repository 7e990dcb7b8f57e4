use crate::cmd::EncodeArgs;
use crate::exit::{schema_error, CliResult, SUCCESS};
use crate::output::{print_encoded, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let schema = args.schema.load()?;
    let params = args.params();
    let built = schema
        .build(&args.path, params.as_ref(), None, args.config.as_deref())
        .map_err(|err| schema_error("encode failed", err))?;

    tracing::debug!(
        command = %built.path,
        bytes = built.frame.wire_size(),
        "frame built"
    );
    print_encoded(&built, format);
    Ok(SUCCESS)
}
