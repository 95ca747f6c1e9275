//! Step-level UI operations built on [`Page`]
//!
//! Each operation logs what it is about to do, performs it and then pauses
//! for the configured step interval so the application can settle.

use std::time::Duration;

use serde_json::Value;

use crate::common::Result;

use super::Page;

/// Suffix addressing an inner label; clicks go to its parent instead
const SPAN_SUFFIX: &str = " > span";

/// Returns the computed `transform` of the first match, or null
const COMPUTED_TRANSFORM_FN: &str = "(selector) => { \
    const el = document.querySelector(selector); \
    if (!el) return null; \
    return window.getComputedStyle(el).transform; \
}";

/// Timing shared by every step of a case
#[derive(Debug, Clone, Copy)]
pub struct StepOptions {
    /// Maximum time to wait for an element
    pub timeout: Duration,
    /// Pause after the action
    pub wait_after: Duration,
}

/// Outcome of a transform check
#[derive(Debug, Clone, PartialEq)]
pub struct TransformCheck {
    pub matches: bool,
    pub transform: Option<String>,
}

/// Wait for an element to appear
pub async fn wait_for_element(
    page: &mut dyn Page,
    selector: &str,
    label: &str,
    timeout: Duration,
) -> Result<()> {
    tracing::info!("Waiting for {}", label);
    page.wait_for(selector, timeout).await?;
    tracing::debug!("{} is present", label);
    Ok(())
}

/// Wait for an element and click it
///
/// Selectors ending in ` > span` are clicked through their parent element.
pub async fn click_element(
    page: &mut dyn Page,
    selector: &str,
    label: &str,
    opts: StepOptions,
) -> Result<()> {
    let target = click_target(selector);
    tracing::info!("Clicking {}", label);
    page.wait_for(target, opts.timeout).await?;
    page.click(target).await?;
    tokio::time::sleep(opts.wait_after).await;
    Ok(())
}

pub async fn double_click_element(
    page: &mut dyn Page,
    selector: &str,
    label: &str,
    opts: StepOptions,
) -> Result<()> {
    tracing::info!("Double-clicking {}", label);
    page.wait_for(selector, opts.timeout).await?;
    page.double_click(selector).await?;
    tokio::time::sleep(opts.wait_after).await;
    Ok(())
}

/// Wait for an input and replace its content
pub async fn fill_input(
    page: &mut dyn Page,
    selector: &str,
    text: &str,
    label: &str,
    opts: StepOptions,
) -> Result<()> {
    tracing::info!("Filling {} with {:?}", label, text);
    page.wait_for(selector, opts.timeout).await?;
    page.fill(selector, text).await?;
    tokio::time::sleep(opts.wait_after).await;
    Ok(())
}

/// Read the computed transform of an element and compare it to `expected`
///
/// The element gets `opts.wait_after` to finish any animation before it is
/// read.
pub async fn check_transform(
    page: &mut dyn Page,
    selector: &str,
    expected: f64,
    label: &str,
    opts: StepOptions,
) -> Result<TransformCheck> {
    tracing::info!("Checking transform of {}", label);
    page.wait_for(selector, opts.timeout).await?;
    tokio::time::sleep(opts.wait_after).await;

    let value = page
        .evaluate(
            COMPUTED_TRANSFORM_FN,
            vec![Value::String(selector.to_string())],
        )
        .await?;
    let transform = value.as_str().map(str::to_string);
    let matches = transform
        .as_deref()
        .is_some_and(|t| transform_matches(t, expected));

    tracing::debug!(
        "{} transform is {:?}, expected {}: {}",
        label,
        transform,
        expected,
        if matches { "match" } else { "no match" }
    );
    Ok(TransformCheck { matches, transform })
}

/// Click `click_selector` only when `check_selector` has the expected transform
///
/// The click goes to `click_selector` exactly as given, without the span
/// parent rewrite. Never fails: any error while checking or clicking is
/// logged and reported as `false`.
pub async fn conditional_click_by_transform(
    page: &mut dyn Page,
    check_selector: &str,
    click_selector: &str,
    expected: f64,
    label: &str,
    opts: StepOptions,
) -> bool {
    let check = match check_transform(page, check_selector, expected, label, opts).await {
        Ok(check) => check,
        Err(e) => {
            tracing::warn!("Transform check on {} failed, skipping click: {}", label, e);
            return false;
        }
    };

    if !check.matches {
        tracing::info!("{} not in expected position, skipping click", label);
        return false;
    }

    tracing::info!("Clicking {}", label);
    let clicked = async {
        page.wait_for(click_selector, opts.timeout).await?;
        page.click(click_selector).await?;
        tokio::time::sleep(opts.wait_after).await;
        Ok::<(), crate::common::Error>(())
    };
    match clicked.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Conditional click on {} failed: {}", label, e);
            false
        }
    }
}

/// Decide whether a computed transform places the element at `expected` px
///
/// Accepts `translate(Npx)`, `translateX(Npx)`, a 2D `matrix(...)` whose
/// x-offset (index 4) equals the value, or a `matrix3d(...)` whose x-offset
/// (index 12) does.
pub fn transform_matches(transform: &str, expected: f64) -> bool {
    let px = format!("{}px", expected);
    if transform.contains(&format!("translate({})", px))
        || transform.contains(&format!("translateX({})", px))
    {
        return true;
    }

    let (index, rest) = if let Some(rest) = transform.strip_prefix("matrix3d(") {
        (12, rest)
    } else if let Some(rest) = transform.strip_prefix("matrix(") {
        (4, rest)
    } else {
        return false;
    };

    let Some(inner) = rest.split(')').next() else {
        return false;
    };
    inner
        .split(',')
        .nth(index)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .is_some_and(|v| v == expected)
}

fn click_target(selector: &str) -> &str {
    selector.strip_suffix(SPAN_SUFFIX).unwrap_or(selector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::driver::test_support::RecordingPage;
    use serde_json::json;

    fn opts() -> StepOptions {
        StepOptions {
            timeout: Duration::from_millis(50),
            wait_after: Duration::ZERO,
        }
    }

    #[test]
    fn test_transform_matches_translate() {
        assert!(transform_matches("translateX(-20px)", -20.0));
        assert!(transform_matches("translate(-20px)", -20.0));
        assert!(!transform_matches("translateX(20px)", -20.0));
    }

    #[test]
    fn test_transform_matches_matrix() {
        assert!(transform_matches("matrix(1, 0, 0, 1, -20, 0)", -20.0));
        assert!(!transform_matches("matrix(1, 0, 0, 1, 0, 0)", -20.0));
        assert!(!transform_matches("matrix(1, 0, 0)", -20.0));
    }

    #[test]
    fn test_transform_matches_matrix3d() {
        let t = "matrix3d(1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, -20, 0, 0, 1)";
        assert!(transform_matches(t, -20.0));
        assert!(!transform_matches(t, 0.0));
    }

    #[test]
    fn test_transform_matches_rejects_none() {
        assert!(!transform_matches("none", -20.0));
        assert!(!transform_matches("", -20.0));
    }

    #[test]
    fn test_transform_matches_fractional_value() {
        assert!(transform_matches("translateX(-12.5px)", -12.5));
        assert!(transform_matches("matrix(1, 0, 0, 1, -12.5, 0)", -12.5));
    }

    #[tokio::test]
    async fn test_click_through_span_parent() {
        let mut page = RecordingPage::default();
        click_element(&mut page, ".tab > span", "tab", opts())
            .await
            .unwrap();
        assert_eq!(page.calls(), vec!["wait .tab", "click .tab"]);
    }

    #[tokio::test]
    async fn test_click_missing_element_times_out() {
        let mut page = RecordingPage::with_missing(&["#send"]);
        let err = click_element(&mut page, "#send", "send", opts())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepTimeout { .. }));
        assert_eq!(page.calls(), vec!["wait #send"]);
    }

    #[tokio::test]
    async fn test_fill_waits_then_fills() {
        let mut page = RecordingPage::default();
        fill_input(&mut page, "#input", "hello", "input", opts())
            .await
            .unwrap();
        assert_eq!(page.calls(), vec!["wait #input", "fill #input hello"]);
    }

    #[tokio::test]
    async fn test_conditional_click_when_transform_matches() {
        let mut page = RecordingPage {
            evaluate_result: json!("matrix(1, 0, 0, 1, -20, 0)"),
            ..Default::default()
        };
        let clicked =
            conditional_click_by_transform(&mut page, "#bar", "#avatar", -20.0, "bar", opts())
                .await;
        assert!(clicked);
        assert_eq!(page.calls().last().unwrap(), "click #avatar");
    }

    #[tokio::test]
    async fn test_conditional_click_keeps_span_selector() {
        let mut page = RecordingPage {
            evaluate_result: json!("translateX(-20px)"),
            ..Default::default()
        };
        let clicked = conditional_click_by_transform(
            &mut page,
            "#bar",
            ".solo-tab > span",
            -20.0,
            "bar",
            opts(),
        )
        .await;
        assert!(clicked);
        let calls = page.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            ["wait .solo-tab > span", "click .solo-tab > span"]
        );
    }

    #[tokio::test]
    async fn test_conditional_click_skipped_when_no_match() {
        let mut page = RecordingPage {
            evaluate_result: json!("none"),
            ..Default::default()
        };
        let clicked =
            conditional_click_by_transform(&mut page, "#bar", "#avatar", -20.0, "bar", opts())
                .await;
        assert!(!clicked);
        assert!(!page.calls().iter().any(|c| c.starts_with("click")));
    }

    #[tokio::test]
    async fn test_conditional_click_swallows_errors() {
        let mut page = RecordingPage::with_missing(&["#bar"]);
        let clicked =
            conditional_click_by_transform(&mut page, "#bar", "#avatar", -20.0, "bar", opts())
                .await;
        assert!(!clicked);
    }
}
