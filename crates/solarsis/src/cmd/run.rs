use std::sync::Arc;

use solarsis_engine::{Callbacks, Driver, Engine, SessionConfig, Submission, TracingSink};
use solarsis_transport::SerialLink;

use crate::cmd::RunArgs;
use crate::exit::{engine_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let schema = args.schema.load()?;
    let mut session = SessionConfig::from_file(&args.session)
        .map_err(|err| engine_error("loading session", err))?;
    if let Some(port) = args.port {
        session.port = port;
    }

    let link = SerialLink::new(session.serial_config())
        .map_err(|err| transport_error("serial settings", err))?;

    let mut callbacks = Callbacks::<()>::new();
    callbacks.observe(move |reply| print_reply(reply, format));

    let engine = Engine::new(Arc::new(schema), session, ())
        .map_err(|err| engine_error("session rejected", err))?
        .with_callbacks(callbacks)
        .with_metrics_sink(TracingSink);
    let driver = Driver::new(engine, link).map_err(|err| engine_error("driver setup", err))?;
    let handle = driver.handle();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;

    let startup = handle.clone();
    runtime
        .block_on(async move {
            for target in args.submit {
                startup.submit(Submission::new(target))?;
            }
            driver
                .run(async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %err, "signal handler setup failed");
                    }
                })
                .await
        })
        .map_err(|err| engine_error("driver failed", err))?;

    let stats = handle.stats();
    tracing::info!(
        sent = stats.sent,
        received = stats.received,
        discarded = stats.discarded,
        restarts = stats.restarts,
        "session finished"
    );
    Ok(SUCCESS)
}
