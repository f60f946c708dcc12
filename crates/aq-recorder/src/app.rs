use crate::{AppResult, StopTriggers, config::Config};

use aq_recorder_core::{
    CafFactory, CpalBackend, RecordingSummary, SessionController, StopSignal,
};

use tracing::{info, instrument};

/// One recording run of the command-line recorder.
///
/// The session controller blocks the calling thread until a stop trigger
/// fires; triggers are watched on a separate runtime.
pub struct App {
    pub(crate) config: Config,
}

impl App {
    /// Record once with the validated `config`.
    #[instrument(skip(self), fields(path = ?self.config.recording.output_path))]
    pub(crate) fn run(&self) -> AppResult<RecordingSummary> {
        info!("AQ-Recorder starting");

        let recording = &self.config.recording;
        let backend = CpalBackend::default_input()?;

        let stop = StopSignal::new();
        let triggers = StopTriggers::spawn(stop.clone(), recording.max_duration())?;

        let controller = SessionController::new(&backend, &CafFactory, recording.to_session_config());

        match recording.max_duration_secs {
            Some(secs) => println!(
                "Recording to {} for up to {}s. Press Return to stop.",
                recording.output_path.display(),
                secs
            ),
            None => println!(
                "Recording to {}. Press Return to stop.",
                recording.output_path.display()
            ),
        }

        let outcome = controller.run(&stop);
        triggers.shutdown();
        let summary = outcome?;

        println!(
            "Wrote {} packets to {} ({}).",
            summary.packets_written,
            summary.path.display(),
            summary.stop_reason
        );

        Ok(summary)
    }
}
