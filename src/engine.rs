//! The analysis engine: recognition, classification, resolution, emission.
//!
//! [`AnalysisEngine::analyze`] asks its [`Recognizer`] for the statements in
//! an image, then hands them to [`resolve_items`], which walks them in order
//! with the variable mapping as an explicit accumulator. Per-item evaluation
//! failures never fail the request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::classify::{normalize, statement, Statement};
use crate::decode::DecodedImage;
use crate::error::{AnalysisError, Result};
use crate::eval::{self, is_identifier, EvalError};
use crate::recognizer::Recognizer;
use crate::types::{ItemKind, MathValue, RecognizedItem, ResultRecord, VariableMapping};

/// Runs one image through recognition and resolution.
///
/// Cheap to share: the engine holds only the recognizer.
#[derive(Clone)]
pub struct AnalysisEngine {
    recognizer: Arc<dyn Recognizer>,
}

impl AnalysisEngine {
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self { recognizer }
    }

    /// Analyze `image` with `variables` as the starting mapping.
    ///
    /// Returns one record per recognized item, in recognition order. An
    /// image with no recognizable content yields an empty list. `cancel` is
    /// honoured until recognition finishes; a recognized image is always
    /// resolved.
    pub async fn analyze(
        &self,
        image: &DecodedImage,
        variables: VariableMapping,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<ResultRecord>> {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(AnalysisError::Cancelled);
        }

        let items = self.recognizer.recognize(image, &variables, cancel).await?;

        let records = resolve_items(&items, variables);
        tracing::info!(
            recognizer = self.recognizer.name(),
            items = items.len(),
            assignments = records.iter().filter(|r| r.assign).count(),
            "image analyzed"
        );
        Ok(records)
    }
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("recognizer", &self.recognizer.name())
            .finish()
    }
}

/// Resolve recognized items in order, threading `variables` through them.
///
/// Each item sees the bindings made by the items before it.
///
/// # Example
///
/// ```
/// use inkcalc::engine::resolve_items;
/// use inkcalc::types::{MathValue, RecognizedItem, VariableMapping};
///
/// let items = [RecognizedItem::text("x = 4"), RecognizedItem::text("x * 2")];
/// let records = resolve_items(&items, VariableMapping::new());
/// assert!(records[0].assign);
/// assert_eq!(records[1].result, MathValue::Number(8.0));
/// ```
pub fn resolve_items(items: &[RecognizedItem], variables: VariableMapping) -> Vec<ResultRecord> {
    let mut vars = variables;
    items
        .iter()
        .map(|item| resolve(item, &mut vars))
        .collect()
}

fn resolve(item: &RecognizedItem, vars: &mut VariableMapping) -> ResultRecord {
    match statement(item) {
        Statement::Expression(text) => {
            let result = eval::evaluate(&text, vars).unwrap_or_else(|e| fallback(item, &text, e));
            record(text, result, false, item.kind)
        }
        Statement::Assignment { name, value } => {
            let result = eval::evaluate(&value, vars).unwrap_or_else(|e| fallback(item, &value, e));
            vars.bind(name.clone(), result.clone());
            record(name, result, true, item.kind)
        }
        Statement::Equation { lhs, rhs } => resolve_equation(item, &lhs, &rhs, vars),
        Statement::Graphical(text) => resolve_graphical(item, text, vars),
    }
}

fn resolve_equation(item: &RecognizedItem, lhs: &str, rhs: &str, vars: &mut VariableMapping) -> ResultRecord {
    let text = normalize(&item.raw_expression);

    match eval::solve_linear(lhs, rhs, vars) {
        Ok((unknown, value)) => {
            let result = MathValue::number(value);
            vars.bind(unknown.clone(), result.clone());
            record(unknown, result, true, item.kind)
        }
        Err(e) => {
            // Nothing unknown: a worked calculation such as `2 + 3 = 5`.
            if let (Ok(left @ MathValue::Number(_)), Ok(MathValue::Number(_))) =
                (eval::evaluate(lhs, vars), eval::evaluate(rhs, vars))
            {
                return record(text, left, false, item.kind);
            }
            let result = fallback(item, &text, e);
            record(text, result, false, item.kind)
        }
    }
}

fn resolve_graphical(item: &RecognizedItem, text: String, vars: &mut VariableMapping) -> ResultRecord {
    let result = match &item.reported_result {
        Some(MathValue::Symbolic(answer)) => match eval::evaluate(answer, vars) {
            Ok(value @ MathValue::Number(_)) => value,
            _ => MathValue::Symbolic(answer.clone()),
        },
        Some(number) => number.clone(),
        None => MathValue::Symbolic(text.clone()),
    };

    if item.reported_assign && item.reported_result.is_some() && is_identifier(&text) {
        vars.bind(text.clone(), result.clone());
        return record(text, result, true, item.kind);
    }
    record(text, result, false, item.kind)
}

/// The value used when local evaluation fails: the recognizer's own answer,
/// else the literal text.
fn fallback(item: &RecognizedItem, text: &str, error: EvalError) -> MathValue {
    tracing::warn!(expression = %text, %error, "evaluation failed, using fallback");
    item.reported_result
        .clone()
        .unwrap_or_else(|| MathValue::Symbolic(text.to_string()))
}

fn record(expression: String, result: MathValue, assign: bool, kind: ItemKind) -> ResultRecord {
    ResultRecord {
        expression,
        result,
        assign,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode_data_url, tests::canvas_data_url};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Canned(Vec<RecognizedItem>);

    #[async_trait]
    impl Recognizer for Canned {
        async fn recognize(
            &self,
            _image: &DecodedImage,
            _variables: &VariableMapping,
            _cancel: Option<&AtomicBool>,
        ) -> Result<Vec<RecognizedItem>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    struct Broken;

    #[async_trait]
    impl Recognizer for Broken {
        async fn recognize(
            &self,
            _image: &DecodedImage,
            _variables: &VariableMapping,
            _cancel: Option<&AtomicBool>,
        ) -> Result<Vec<RecognizedItem>> {
            Err(AnalysisError::RecognitionFailed("model offline".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    /// Hands out its batches in turn, one per call.
    struct Sequenced {
        batches: Vec<Vec<RecognizedItem>>,
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<VariableMapping>>,
    }

    impl Sequenced {
        fn new(batches: &[&[&str]]) -> Self {
            Self {
                batches: batches
                    .iter()
                    .map(|texts| texts.iter().map(|t| RecognizedItem::text(*t)).collect())
                    .collect(),
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Recognizer for Sequenced {
        async fn recognize(
            &self,
            _image: &DecodedImage,
            variables: &VariableMapping,
            _cancel: Option<&AtomicBool>,
        ) -> Result<Vec<RecognizedItem>> {
            self.seen.lock().unwrap().push(variables.clone());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.batches[call % self.batches.len()].clone())
        }

        fn name(&self) -> &str {
            "sequenced"
        }
    }

    /// Raises the shutdown flag while it is reading.
    struct ShutdownMidway;

    #[async_trait]
    impl Recognizer for ShutdownMidway {
        async fn recognize(
            &self,
            _image: &DecodedImage,
            _variables: &VariableMapping,
            cancel: Option<&AtomicBool>,
        ) -> Result<Vec<RecognizedItem>> {
            if let Some(flag) = cancel {
                flag.store(true, Ordering::Relaxed);
            }
            Ok(vec![RecognizedItem::text("6 * 7")])
        }

        fn name(&self) -> &str {
            "shutdown-midway"
        }
    }

    fn resolve_texts(texts: &[&str], vars: VariableMapping) -> Vec<ResultRecord> {
        let items: Vec<_> = texts.iter().map(|t| RecognizedItem::text(*t)).collect();
        resolve_items(&items, vars)
    }

    fn num(n: f64) -> MathValue {
        MathValue::Number(n)
    }

    #[test]
    fn test_plain_expression() {
        let records = resolve_texts(&["2 + 3 * 4"], VariableMapping::new());
        assert_eq!(records, vec![record("2 + 3 * 4".into(), num(14.0), false, ItemKind::Expression)]);
    }

    #[test]
    fn test_dangling_equals_is_dropped() {
        let records = resolve_texts(&["5 * 6 =", "8 / 2 = ?"], VariableMapping::new());
        assert_eq!(records[0].expression, "5 * 6");
        assert_eq!(records[0].result, num(30.0));
        assert_eq!(records[1].result, num(4.0));
    }

    #[test]
    fn test_assignment_threads_forward() {
        let records = resolve_texts(&["x = 4", "x * 2", "y = x + 1", "x + y"], VariableMapping::new());
        assert_eq!(records[0], record("x".into(), num(4.0), true, ItemKind::Assignment));
        assert_eq!(records[1].result, num(8.0));
        assert_eq!(records[2], record("y".into(), num(5.0), true, ItemKind::Assignment));
        assert_eq!(records[3].result, num(9.0));
    }

    #[test]
    fn test_items_only_see_earlier_bindings() {
        let records = resolve_texts(&["a + 1", "a = 2", "a + 1"], VariableMapping::new());
        assert_eq!(records[0].result, MathValue::Symbolic("a + 1".into()));
        assert_eq!(records[2].result, num(3.0));
    }

    #[test]
    fn test_seeded_variables() {
        let vars = VariableMapping::new().with("y", 10i64);
        let records = resolve_texts(&["y + 1"], vars);
        assert_eq!(records[0].result, num(11.0));
    }

    #[test]
    fn test_unbound_symbols_stay_symbolic() {
        let records = resolve_texts(&["x + 3"], VariableMapping::new());
        assert_eq!(records[0].result, MathValue::Symbolic("x + 3".into()));
        assert!(!records[0].assign);
    }

    #[test]
    fn test_equation_is_solved_and_bound() {
        let records = resolve_texts(&["2x + 3 = 7", "x + 1"], VariableMapping::new());
        assert_eq!(records[0], record("x".into(), num(2.0), true, ItemKind::Equation));
        assert_eq!(records[1].result, num(3.0));
    }

    #[test]
    fn test_equation_uses_bound_variables() {
        let vars = VariableMapping::new().with("y", 4i64);
        let records = resolve_texts(&["x + y = 10"], vars);
        assert_eq!(records[0].expression, "x");
        assert_eq!(records[0].result, num(6.0));
    }

    #[test]
    fn test_worked_calculation_is_evaluated() {
        let records = resolve_texts(&["2 + 3 = 5"], VariableMapping::new());
        assert_eq!(records[0], record("2 + 3 = 5".into(), num(5.0), false, ItemKind::Equation));
    }

    #[test]
    fn test_unsolvable_equation_falls_back() {
        let item = RecognizedItem::new("x^2 = 4", None, Some(MathValue::Number(2.0)), false);
        let records = resolve_items(&[item], VariableMapping::new());
        assert_eq!(records[0].expression, "x^2 = 4");
        assert_eq!(records[0].result, num(2.0));
        assert!(!records[0].assign);

        let records = resolve_texts(&["x + y = 3"], VariableMapping::new());
        assert_eq!(records[0].result, MathValue::Symbolic("x + y = 3".into()));
    }

    #[test]
    fn test_division_by_zero_does_not_fail_request() {
        let reported = RecognizedItem::new("1/0", None, Some(MathValue::Symbolic("undefined".into())), false);
        let records = resolve_items(
            &[reported, RecognizedItem::text("1/0"), RecognizedItem::text("2 + 2")],
            VariableMapping::new(),
        );
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].result, MathValue::Symbolic("undefined".into()));
        assert_eq!(records[1].result, MathValue::Symbolic("1/0".into()));
        assert_eq!(records[2].result, num(4.0));
    }

    #[test]
    fn test_bare_identifier_assignment_uses_reported_value() {
        let item = RecognizedItem::new("y", None, Some(MathValue::Number(10.0)), true);
        let records = resolve_items(&[item, RecognizedItem::text("y * 3")], VariableMapping::new());
        assert_eq!(records[0], record("y".into(), num(10.0), true, ItemKind::Assignment));
        assert_eq!(records[1].result, num(30.0));
    }

    #[test]
    fn test_graphical_items() {
        let described = RecognizedItem::new(
            "right triangle with legs 3 and 4",
            Some("geometry"),
            Some(MathValue::Symbolic("hypotenuse is 5".into())),
            false,
        );
        let computed = RecognizedItem::new(
            "area of a 3 by 4 rectangle",
            Some("diagram"),
            Some(MathValue::Symbolic("3 * 4".into())),
            false,
        );
        let bound = RecognizedItem::new("area", Some("graph"), Some(MathValue::Number(12.0)), true);
        let unanswered = RecognizedItem::new("a drawing of love", Some("abstract"), None, false);

        let records = resolve_items(
            &[described, computed, bound, unanswered, RecognizedItem::text("area / 2")],
            VariableMapping::new(),
        );
        assert!(records.iter().take(4).all(|r| r.kind == ItemKind::Graphical));
        assert_eq!(records[0].result, MathValue::Symbolic("hypotenuse is 5".into()));
        assert_eq!(records[1].result, num(12.0));
        assert!(records[2].assign);
        assert_eq!(records[3].result, MathValue::Symbolic("a drawing of love".into()));
        assert_eq!(records[4].result, num(6.0));
    }

    #[tokio::test]
    async fn test_analyze_runs_recognizer_then_resolution() {
        let engine = AnalysisEngine::new(Arc::new(Canned(vec![
            RecognizedItem::text("z = 3"),
            RecognizedItem::text("z^2"),
        ])));
        let image = decode_data_url(&canvas_data_url(2, 2)).unwrap();

        let records = engine.analyze(&image, VariableMapping::new(), None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].result, num(9.0));
    }

    #[tokio::test]
    async fn test_bindings_do_not_outlive_their_request() {
        let recognizer = Arc::new(Sequenced::new(&[&["x = 5", "x + 1"], &["x + 1"]]));
        let engine = AnalysisEngine::new(recognizer.clone());
        let image = decode_data_url(&canvas_data_url(2, 2)).unwrap();

        let first = engine.analyze(&image, VariableMapping::new(), None).await.unwrap();
        assert_eq!(first[1].result, num(6.0));

        let second = engine.analyze(&image, VariableMapping::new(), None).await.unwrap();
        assert_eq!(second[0].result, MathValue::Symbolic("x + 1".into()));
        assert!(!second[0].assign);

        let seen = recognizer.seen.lock().unwrap();
        assert!(seen.iter().all(VariableMapping::is_empty));
    }

    #[tokio::test]
    async fn test_repeated_analysis_is_identical() {
        let engine = AnalysisEngine::new(Arc::new(Canned(vec![
            RecognizedItem::text("a = 2"),
            RecognizedItem::text("3a + b = 10"),
            RecognizedItem::text("a * b"),
            RecognizedItem::text("q / 0"),
        ])));
        let image = decode_data_url(&canvas_data_url(2, 2)).unwrap();
        let seed = VariableMapping::new().with("c", 1i64);

        let first = engine.analyze(&image, seed.clone(), None).await.unwrap();
        let second = engine.analyze(&image, seed, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|r| r.kind).collect::<Vec<_>>(),
            [ItemKind::Assignment, ItemKind::Equation, ItemKind::Expression, ItemKind::Expression]
        );
        assert_eq!(first[2].result, num(8.0));
    }

    #[tokio::test]
    async fn test_shutdown_after_recognition_keeps_the_result() {
        let engine = AnalysisEngine::new(Arc::new(ShutdownMidway));
        let image = decode_data_url(&canvas_data_url(2, 2)).unwrap();
        let cancel = AtomicBool::new(false);

        let records = engine.analyze(&image, VariableMapping::new(), Some(&cancel)).await.unwrap();
        assert!(cancel.load(Ordering::Relaxed));
        assert_eq!(records[0].result, num(42.0));
    }

    #[tokio::test]
    async fn test_analyze_empty_and_failures() {
        let image = decode_data_url(&canvas_data_url(2, 2)).unwrap();

        let empty = AnalysisEngine::new(Arc::new(Canned(Vec::new())));
        assert!(empty.analyze(&image, VariableMapping::new(), None).await.unwrap().is_empty());

        let broken = AnalysisEngine::new(Arc::new(Broken));
        let err = broken.analyze(&image, VariableMapping::new(), None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::RecognitionFailed(_)));

        let cancel = AtomicBool::new(true);
        let err = empty.analyze(&image, VariableMapping::new(), Some(&cancel)).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }
}
