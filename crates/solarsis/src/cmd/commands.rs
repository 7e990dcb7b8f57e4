use crate::cmd::CommandsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_commands, OutputFormat};

pub fn run(args: CommandsArgs, format: OutputFormat) -> CliResult<i32> {
    let schema = args.schema.load()?;
    tracing::debug!(
        families = schema.families().len(),
        commands = schema.command_count(),
        "protocol document loaded"
    );
    print_commands(&schema, format);
    Ok(SUCCESS)
}
