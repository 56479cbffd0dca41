//! Drives the solver against a live challenge page.
//!
//! Every attempt runs `start -> capture -> pipeline -> submit -> observe` and
//! ends as an [`AttemptResult`]; failures never escape an attempt, so the
//! loop always gets through the configured count.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;
use tracing::{error, info, info_span, instrument, warn};

use crate::{
    browser::{Browser, Locator},
    error::{ErrorKind, SolveError},
    CaptchaSolver,
};

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Page serving the challenge UI.
    pub url: String,
    pub attempts: usize,
    /// Upper bound for every element-presence wait.
    pub element_timeout: Duration,
    /// Pause after starting a challenge so the image can render.
    pub render_delay: Duration,
    /// Pause after submitting before the page is inspected.
    pub submit_delay: Duration,
    /// Pause after the refresh that ends each attempt.
    pub reset_delay: Duration,
    pub start_button: Locator,
    pub captcha_image: Locator,
    pub answer_input: Locator,
    pub submit_button: Locator,
    /// Case-insensitive text whose presence in the page source means solved.
    pub success_marker: String,
    /// Where captures and diagnostic screenshots are written.
    pub artifact_dir: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
            attempts: 10,
            element_timeout: Duration::from_secs(10),
            render_delay: Duration::from_secs(1),
            submit_delay: Duration::from_secs(2),
            reset_delay: Duration::from_secs(1),
            start_button: Locator::id("start-test"),
            captcha_image: Locator::class("captcha-image"),
            answer_input: Locator::id("user-input"),
            submit_button: Locator::id("submit-btn"),
            success_marker: "success".to_string(),
            artifact_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    Start,
    Capture,
    Pipeline,
    Submit,
    Observe,
}

impl AttemptStage {
    fn fail(self, source: SolveError) -> AttemptError {
        AttemptError {
            stage: self,
            source,
        }
    }
}

impl std::fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttemptStage::Start => "start",
            AttemptStage::Capture => "capture",
            AttemptStage::Pipeline => "pipeline",
            AttemptStage::Submit => "submit",
            AttemptStage::Observe => "observe",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct AttemptError {
    pub stage: AttemptStage,
    #[source]
    pub source: SolveError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The page showed the success marker after submitting.
    Solved,
    /// The answer was submitted but not accepted.
    Rejected,
    Failed {
        stage: AttemptStage,
        kind: ErrorKind,
        error: String,
        screenshot: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    /// 1-based.
    pub attempt: usize,
    pub answer: Option<String>,
    pub outcome: AttemptOutcome,
}

impl AttemptResult {
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Solved
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed { .. })
    }

    fn log(&self) {
        let answer = self.answer.as_deref().unwrap_or("");
        match &self.outcome {
            AttemptOutcome::Solved => info!(attempt = self.attempt, answer, "attempt solved"),
            AttemptOutcome::Rejected => info!(attempt = self.attempt, answer, "attempt rejected"),
            AttemptOutcome::Failed {
                stage,
                error,
                screenshot,
                ..
            } => error!(
                attempt = self.attempt,
                %stage,
                error = error.as_str(),
                screenshot = ?screenshot,
                "attempt failed"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub attempts: Vec<AttemptResult>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.attempts.len()
    }

    pub fn solved(&self) -> usize {
        self.attempts.iter().filter(|it| it.is_success()).count()
    }

    pub fn rejected(&self) -> usize {
        self.attempts
            .iter()
            .filter(|it| it.outcome == AttemptOutcome::Rejected)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.attempts.iter().filter(|it| it.is_failed()).count()
    }

    pub fn success_rate(&self) -> f32 {
        if self.attempts.is_empty() {
            0.0
        } else {
            self.solved() as f32 / self.total() as f32
        }
    }
}

/// A file that is removed when dropped.
#[derive(Debug)]
pub struct TransientArtifact {
    path: PathBuf,
}

impl TransientArtifact {
    pub fn create(path: impl Into<PathBuf>, contents: &[u8]) -> std::io::Result<Self> {
        let artifact = Self { path: path.into() };
        std::fs::write(&artifact.path, contents)?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::trace!("Removed {:?}", self.path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = ?self.path, error = %err, "failed to remove transient artifact"),
        }
    }
}

pub struct CaptchaBot<B: Browser> {
    solver: Arc<CaptchaSolver>,
    browser: B,
    config: BotConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<B: Browser> CaptchaBot<B> {
    pub fn new(solver: Arc<CaptchaSolver>, browser: B, config: BotConfig) -> Self {
        Self {
            solver,
            browser,
            config,
            cancel: None,
        }
    }

    /// Stops the loop before the next attempt once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Runs every configured attempt, then closes the browser.
    ///
    /// Only failing to open the challenge page is an error; attempt failures
    /// end up in the report.
    pub fn run(mut self) -> Result<RunReport, SolveError> {
        let span = info_span!("run", url = %self.config.url, attempts = self.config.attempts);
        let _enter = span.enter();

        if let Err(err) = self.browser.goto(&self.config.url) {
            error!(error = %err, "failed to open challenge page");
            self.release();
            return Err(err);
        }

        let mut report = RunReport::default();
        for attempt in 1..=self.config.attempts {
            if self.is_cancelled() {
                warn!(attempt, "run cancelled");
                break;
            }
            let result = self.attempt(attempt);
            result.log();
            report.attempts.push(result);
            self.reset();
        }
        self.release();

        info!(
            total = report.total(),
            solved = report.solved(),
            rejected = report.rejected(),
            failed = report.failed(),
            "run finished"
        );
        Ok(report)
    }

    /// One full challenge cycle. Never fails; errors become
    /// [`AttemptOutcome::Failed`].
    #[instrument(skip(self))]
    pub fn attempt(&mut self, attempt: usize) -> AttemptResult {
        let mut answer = None;
        match self.try_attempt(attempt, &mut answer) {
            Ok(outcome) => AttemptResult {
                attempt,
                answer,
                outcome,
            },
            Err(AttemptError { stage, source }) => AttemptResult {
                attempt,
                answer,
                outcome: AttemptOutcome::Failed {
                    stage,
                    kind: source.kind(),
                    error: source.to_string(),
                    screenshot: self.capture_diagnostic(attempt),
                },
            },
        }
    }

    fn try_attempt(
        &mut self,
        attempt: usize,
        answer: &mut Option<String>,
    ) -> Result<AttemptOutcome, AttemptError> {
        let config = &self.config;

        self.browser
            .wait_for(&config.start_button, config.element_timeout)
            .and_then(|_| self.browser.click(&config.start_button))
            .map_err(|err| AttemptStage::Start.fail(err))?;
        pause(config.render_delay);

        self.browser
            .wait_for(&config.captcha_image, config.element_timeout)
            .map_err(|err| AttemptStage::Capture.fail(err))?;
        let bytes = self
            .browser
            .screenshot_element(&config.captcha_image)
            .map_err(|err| AttemptStage::Capture.fail(err))?;
        let capture = TransientArtifact::create(
            config.artifact_dir.join(format!("captcha_{attempt}.png")),
            &bytes,
        )
        .map_err(|err| AttemptStage::Capture.fail(err.into()))?;

        let prediction = self.solver.solve_path(capture.path());
        drop(capture);
        let prediction = prediction.map_err(|err| AttemptStage::Pipeline.fail(err))?;
        let text = prediction.text();
        *answer = Some(text.clone());

        self.browser
            .clear(&config.answer_input)
            .and_then(|_| self.browser.send_keys(&config.answer_input, &text))
            .and_then(|_| self.browser.click(&config.submit_button))
            .map_err(|err| AttemptStage::Submit.fail(err))?;

        pause(config.submit_delay);
        let source = self
            .browser
            .page_source()
            .map_err(|err| AttemptStage::Observe.fail(err))?;
        if source
            .to_lowercase()
            .contains(&config.success_marker.to_lowercase())
        {
            Ok(AttemptOutcome::Solved)
        } else {
            Ok(AttemptOutcome::Rejected)
        }
    }

    /// Best-effort full-page screenshot for a failed attempt.
    fn capture_diagnostic(&mut self, attempt: usize) -> Option<PathBuf> {
        let path = self.config.artifact_dir.join(format!("error_{attempt}.png"));
        let saved = self
            .browser
            .screenshot()
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(SolveError::from));
        match saved {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(attempt, error = %err, "failed to capture diagnostic screenshot");
                None
            }
        }
    }

    fn reset(&mut self) {
        if let Err(err) = self.browser.refresh() {
            warn!(error = %err, "failed to refresh page between attempts");
        }
        pause(self.config.reset_delay);
    }

    fn release(&mut self) {
        if let Err(err) = self.browser.close() {
            warn!(error = %err, "failed to close browser");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_artifact_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.png");
        let artifact = TransientArtifact::create(&path, b"png").unwrap();
        assert!(artifact.path().exists());
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("capture.png");
        assert!(TransientArtifact::create(&path, b"png").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn report_counts_outcomes() {
        let result = |attempt, outcome| AttemptResult {
            attempt,
            answer: None,
            outcome,
        };
        let report = RunReport {
            attempts: vec![
                result(1, AttemptOutcome::Solved),
                result(2, AttemptOutcome::Rejected),
                result(
                    3,
                    AttemptOutcome::Failed {
                        stage: AttemptStage::Submit,
                        kind: ErrorKind::Automation,
                        error: "gone".into(),
                        screenshot: None,
                    },
                ),
                result(4, AttemptOutcome::Solved),
            ],
        };
        assert_eq!(report.total(), 4);
        assert_eq!(report.solved(), 2);
        assert_eq!(report.rejected(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.success_rate(), 0.5);
    }
}
