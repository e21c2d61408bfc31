//! Two-tier step verifier

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use action_primitives::{PageDriver, Query};
use replaybook_core_types::{Step, StepVerify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::GateError;
use crate::judge::{GuidanceRequest, JudgeRequest, PerceptualJudge};
use crate::types::{
    VerifierConfig, VerifierStatus, VerifyMethod, VerifyResult, MANUAL_CONFIRMATION_MESSAGE,
};

/// Verifies that a step's effect happened.
///
/// Structural checks run first and are free. When they fail and the step
/// allows it, a configured [`PerceptualJudge`] is consulted on a screenshot.
/// Perceptual failures are counted across steps; once the count reaches
/// `failure_threshold` the fallback turns itself off until [`reset`] or
/// [`enable_perceptual`] is called. Any success clears the count.
///
/// [`reset`]: StepVerifier::reset
/// [`enable_perceptual`]: StepVerifier::enable_perceptual
pub struct StepVerifier {
    judge: Option<Arc<dyn PerceptualJudge>>,
    config: VerifierConfig,
    failure_count: AtomicU32,
    perceptual_enabled: AtomicBool,
}

impl StepVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        let enabled = config.perceptual_enabled;
        Self {
            judge: None,
            config,
            failure_count: AtomicU32::new(0),
            perceptual_enabled: AtomicBool::new(enabled),
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn PerceptualJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub async fn verify(
        &self,
        step: &Step,
        page: &dyn PageDriver,
    ) -> Result<VerifyResult, GateError> {
        let Some(verify) = &step.verify else {
            return Ok(VerifyResult::passed(
                VerifyMethod::Structural,
                "No verification required",
            ));
        };

        if let Some(reason) = self.check_structural(verify, page).await {
            info!("step {} verified structurally: {}", step.id, reason);
            self.failure_count.store(0, Ordering::SeqCst);
            return Ok(VerifyResult::passed(VerifyMethod::Structural, reason));
        }

        let judge = match &self.judge {
            Some(judge) if verify.perceptual_allowed() && self.perceptual_active() => judge,
            _ => {
                debug!("step {} failed structural verification", step.id);
                return Ok(VerifyResult::failed(
                    VerifyMethod::Structural,
                    "Structural verification failed",
                    MANUAL_CONFIRMATION_MESSAGE,
                )
                .with_retry_count(self.failure_count.load(Ordering::SeqCst)));
            }
        };

        let screenshot = page.screenshot().await?;
        let instruction = instruction_for(step);
        let request = JudgeRequest {
            screenshot: &screenshot,
            instruction: &instruction,
            success_condition: verify.condition.as_deref(),
        };

        let verdict = match timeout(self.config.judge_timeout, judge.judge(&request)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                self.record_failure();
                return Err(err);
            }
            Err(_) => {
                let count = self.record_failure();
                warn!(
                    "perceptual judgment for step {} timed out after {}ms",
                    step.id,
                    self.config.judge_timeout.as_millis()
                );
                return Ok(VerifyResult::failed(
                    VerifyMethod::Perceptual,
                    GateError::JudgeTimeout(self.config.judge_timeout.as_millis() as u64)
                        .to_string(),
                    MANUAL_CONFIRMATION_MESSAGE,
                )
                .with_retry_count(count));
            }
        };

        if verdict.passed {
            info!("step {} verified perceptually: {}", step.id, verdict.reason);
            self.failure_count.store(0, Ordering::SeqCst);
            return Ok(VerifyResult::passed(VerifyMethod::Perceptual, verdict.reason));
        }

        let count = self.record_failure();
        let guidance = self
            .guidance(judge.as_ref(), &screenshot, &instruction, &verdict.reason)
            .await;
        Ok(VerifyResult::failed(VerifyMethod::Perceptual, verdict.reason, guidance)
            .with_retry_count(count))
    }

    pub fn status(&self) -> VerifierStatus {
        VerifierStatus {
            enabled: self.perceptual_active(),
            fail_count: self.failure_count.load(Ordering::SeqCst),
            max_retries: self.config.failure_threshold,
        }
    }

    /// Clears the failure count and turns the perceptual fallback back on.
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.perceptual_enabled.store(true, Ordering::SeqCst);
        info!("perceptual verification re-enabled");
    }

    pub fn enable_perceptual(&self, enabled: bool) {
        self.perceptual_enabled.store(enabled, Ordering::SeqCst);
    }

    fn perceptual_active(&self) -> bool {
        self.perceptual_enabled.load(Ordering::SeqCst)
            && self.failure_count.load(Ordering::SeqCst) < self.config.failure_threshold
    }

    fn record_failure(&self) -> u32 {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.config.failure_threshold {
            self.perceptual_enabled.store(false, Ordering::SeqCst);
            warn!(
                "perceptual verification disabled after {} consecutive failures",
                count
            );
        }
        count
    }

    /// First passing check wins. Driver errors count as a miss.
    async fn check_structural(&self, verify: &StepVerify, page: &dyn PageDriver) -> Option<String> {
        for selector in verify.success_selectors() {
            match page
                .wait_visible(&Query::css(selector), self.config.structural_timeout)
                .await
            {
                Ok(true) => return Some(format!("Selector found: {}", selector)),
                Ok(false) => {}
                Err(err) => debug!("success selector {} failed: {}", selector, err),
            }
        }

        if let Some(fragment) = &verify.success_url_contains {
            match page.url().await {
                Ok(url) if url.contains(fragment.as_str()) => {
                    return Some(format!("URL contains: {}", fragment));
                }
                Ok(_) => {}
                Err(err) => debug!("url lookup failed: {}", err),
            }
        }

        if let Some(text) = &verify.success_text {
            match page.count(&Query::text(text)).await {
                Ok(n) if n > 0 => return Some(format!("Text found: {}", text)),
                Ok(_) => {}
                Err(err) => debug!("success text lookup failed: {}", err),
            }
        }

        None
    }

    async fn guidance(
        &self,
        judge: &dyn PerceptualJudge,
        screenshot: &[u8],
        instruction: &str,
        failure_reason: &str,
    ) -> String {
        let request = GuidanceRequest {
            screenshot,
            instruction,
            failure_reason,
        };
        match timeout(self.config.judge_timeout, judge.guidance(&request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => MANUAL_CONFIRMATION_MESSAGE.to_string(),
            Ok(Err(err)) => {
                warn!("guidance request failed: {}", err);
                MANUAL_CONFIRMATION_MESSAGE.to_string()
            }
            Err(_) => {
                warn!("guidance request timed out");
                MANUAL_CONFIRMATION_MESSAGE.to_string()
            }
        }
    }
}

impl Default for StepVerifier {
    fn default() -> Self {
        Self::new(VerifierConfig::default())
    }
}

/// What the human was asked to do.
fn instruction_for(step: &Step) -> String {
    match (&step.message, &step.selector) {
        (Some(message), _) => message.clone(),
        (None, Some(selector)) => format!("{} {}", step.action, selector),
        (None, None) => step.action.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::{FixtureElement, FixturePage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use replaybook_core_types::{ActionType, WaitFor};
    use std::collections::VecDeque;
    use std::time::Duration;

    use crate::judge::JudgeVerdict;

    /// Answers judgments from a script and counts every call.
    #[derive(Default)]
    struct ScriptedJudge {
        verdicts: Mutex<VecDeque<Result<JudgeVerdict, GateError>>>,
        judge_calls: Mutex<u32>,
        guidance_calls: Mutex<u32>,
        delay: Option<Duration>,
    }

    impl ScriptedJudge {
        fn with(verdicts: Vec<Result<JudgeVerdict, GateError>>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PerceptualJudge for ScriptedJudge {
        async fn judge(&self, _request: &JudgeRequest<'_>) -> Result<JudgeVerdict, GateError> {
            *self.judge_calls.lock() += 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.verdicts
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(JudgeVerdict::fail("nothing changed")))
        }

        async fn guidance(&self, request: &GuidanceRequest<'_>) -> Result<String, GateError> {
            *self.guidance_calls.lock() += 1;
            Ok(format!("Try again: {}", request.instruction))
        }
    }

    fn verified_step() -> Step {
        Step::new("login", ActionType::Guide)
            .with_message("Log in with your certificate")
            .with_wait_for(WaitFor::User)
            .with_verify(StepVerify {
                success_selector: Some("#logout, .user-menu".into()),
                success_url_contains: Some("/dashboard".into()),
                ..Default::default()
            })
    }

    fn blank_page() -> FixturePage {
        FixturePage::new("https://portal.test/login", vec![])
    }

    #[test]
    fn test_no_verify_block_passes() {
        let verifier = StepVerifier::default();
        let step = Step::new("s", ActionType::Click);
        let page = blank_page();
        let result = tokio_test::block_on(verifier.verify(&step, &page)).unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_structural_selector_list() {
        let page = FixturePage::new(
            "https://portal.test/login",
            vec![FixtureElement::new("div").with_selector(".user-menu")],
        );
        let result = StepVerifier::default()
            .verify(&verified_step(), &page)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.method, VerifyMethod::Structural);
        assert_eq!(result.message.as_deref(), Some("Selector found: .user-menu"));
    }

    #[tokio::test]
    async fn test_structural_url_fragment() {
        let page = FixturePage::new("https://portal.test/dashboard?tab=1", vec![]);
        let result = StepVerifier::default()
            .verify(&verified_step(), &page)
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_structural_failure_without_judge_asks_for_manual_confirmation() {
        let result = StepVerifier::default()
            .verify(&verified_step(), &blank_page())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.guidance.as_deref(), Some(MANUAL_CONFIRMATION_MESSAGE));
    }

    #[tokio::test]
    async fn test_negative_judgment_requests_guidance() {
        let judge = Arc::new(ScriptedJudge::default());
        let verifier = StepVerifier::default().with_judge(judge.clone());
        let result = verifier.verify(&verified_step(), &blank_page()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.method, VerifyMethod::Perceptual);
        assert_eq!(
            result.guidance.as_deref(),
            Some("Try again: Log in with your certificate")
        );
        assert_eq!(result.retry_count, 1);
        assert_eq!(*judge.guidance_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_judgment_calls() {
        let judge = Arc::new(ScriptedJudge::default());
        let verifier = StepVerifier::default().with_judge(judge.clone());
        let step = verified_step();
        let page = blank_page();

        for _ in 0..3 {
            verifier.verify(&step, &page).await.unwrap();
        }
        assert_eq!(*judge.judge_calls.lock(), 3);
        assert_eq!(
            verifier.status(),
            VerifierStatus {
                enabled: false,
                fail_count: 3,
                max_retries: 3
            }
        );

        let result = verifier.verify(&step, &page).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.guidance.as_deref(), Some(MANUAL_CONFIRMATION_MESSAGE));
        assert_eq!(*judge.judge_calls.lock(), 3);

        verifier.reset();
        assert!(verifier.status().enabled);
        verifier.verify(&step, &page).await.unwrap();
        assert_eq!(*judge.judge_calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let judge = Arc::new(ScriptedJudge::with(vec![
            Ok(JudgeVerdict::fail("still on login page")),
            Ok(JudgeVerdict::pass("dashboard visible")),
        ]));
        let verifier = StepVerifier::default().with_judge(judge);
        let step = verified_step();
        let page = blank_page();

        verifier.verify(&step, &page).await.unwrap();
        assert_eq!(verifier.status().fail_count, 1);
        let result = verifier.verify(&step, &page).await.unwrap();
        assert!(result.success);
        assert_eq!(result.method, VerifyMethod::Perceptual);
        assert_eq!(verifier.status().fail_count, 0);
    }

    #[tokio::test]
    async fn test_vision_disabled_on_step() {
        let judge = Arc::new(ScriptedJudge::default());
        let verifier = StepVerifier::default().with_judge(judge.clone());
        let mut step = verified_step();
        if let Some(verify) = step.verify.as_mut() {
            verify.fallback_vision = Some(false);
        }
        let result = verifier.verify(&step, &blank_page()).await.unwrap();
        assert!(!result.success);
        assert_eq!(*judge.judge_calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_judge_error_propagates_and_counts() {
        let judge = Arc::new(ScriptedJudge::with(vec![Err(GateError::Judge(
            "quota exceeded".into(),
        ))]));
        let verifier = StepVerifier::default().with_judge(judge);
        let err = verifier
            .verify(&verified_step(), &blank_page())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Judge(_)));
        assert_eq!(verifier.status().fail_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_judge_timeout_counts_as_failure() {
        let judge = Arc::new(ScriptedJudge {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let verifier = StepVerifier::new(VerifierConfig {
            judge_timeout: Duration::from_secs(1),
            ..Default::default()
        })
        .with_judge(judge);
        let result = verifier.verify(&verified_step(), &blank_page()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.retry_count, 1);
        assert_eq!(result.guidance.as_deref(), Some(MANUAL_CONFIRMATION_MESSAGE));
    }
}
