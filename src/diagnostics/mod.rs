//! Structured dispatch diagnostics.
//!
//! Ambiguity and no-match failures are data, not control flow: analysis of
//! one call site never aborts the compilation. Each record carries everything
//! its rendering needs (resolved type names included), so [`Diagnostic::render`]
//! is a pure function of the record with no registry or I/O coupling.

use crate::registry::TypeRegistry;
use crate::signature::Implementation;
use crate::types::{FunctionId, SourceSpan, TypeId};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Stable diagnostic codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// `S1101`: two or more equally specific implementations.
    AmbiguousDispatch,
    /// `S1102`: no implementation accepts the argument types.
    NoMatchingImplementation,
    /// `S1103`: the same definition registered twice.
    DuplicateImplementation,
    /// `S1201`: dispatch-cost performance hint.
    PerformanceHint,
    /// `S1301`: circular dependency between compilation units.
    CircularDependency,
    /// `NPUxxx`: a diagnostic recorded on behalf of an adjacent subsystem.
    Subsystem(u16),
}

impl core::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AmbiguousDispatch => f.write_str("S1101"),
            Self::NoMatchingImplementation => f.write_str("S1102"),
            Self::DuplicateImplementation => f.write_str("S1103"),
            Self::PerformanceHint => f.write_str("S1201"),
            Self::CircularDependency => f.write_str("S1301"),
            Self::Subsystem(n) => write!(f, "NPU{n:03}"),
        }
    }
}

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational; compilation proceeds silently unless verbose.
    Info,
    /// Suspicious but not fatal to the call site.
    Warning,
    /// Fatal to the call site (never to the whole compilation).
    Error,
}

/// Opaque handle to a diagnostic inside a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiagnosticId(pub u32);

/// Relation between two parameter types at the same index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamRelation {
    /// Identical types.
    Identical,
    /// Left parameter is a strict subtype of the right.
    LeftNarrower,
    /// Right parameter is a strict subtype of the left.
    RightNarrower,
    /// No subtype relation either way.
    Unrelated,
}

/// Aggregate verdict of a pairwise comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecificityVerdict {
    /// Identical parameter sequences.
    Equal,
    /// Left dominates.
    LeftMoreSpecific,
    /// Right dominates.
    RightMoreSpecific,
    /// Neither dominates: the source of ambiguity.
    Incomparable,
}

/// Pairwise specificity analysis between two conflicting implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairwiseSpecificity {
    /// Qualified name of the left implementation.
    pub left: String,
    /// Qualified name of the right implementation.
    pub right: String,
    /// Per-parameter relations.
    pub params: Vec<ParamRelation>,
    /// Aggregate verdict.
    pub verdict: SpecificityVerdict,
}

/// Why a candidate implementation was rejected for a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// An argument type is unrelated to the parameter type.
    TypeMismatch,
    /// The argument is a supertype of the parameter: only runtime narrowing
    /// could reach this implementation.
    InsufficientSpecificity,
    /// The candidate ties with another and neither dominates.
    AmbiguousWithOther,
    /// A generic constraint on the implementation was not satisfied.
    GenericConstraintViolation,
    /// The call site lacks a capability the implementation requires.
    CapabilityMismatch,
}

/// Rejection record for one candidate in a no-match report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionInfo {
    /// The rejected implementation.
    pub function: FunctionId,
    /// Its qualified name.
    pub qualified_name: String,
    /// Why it was rejected.
    pub reason: RejectionReason,
    /// Index of the offending parameter, when one pinpoints the failure.
    pub parameter_index: Option<usize>,
    /// Rendered name of the expected (parameter) type.
    pub expected: Option<String>,
    /// Rendered name of the actual (argument) type.
    pub actual: Option<String>,
    /// The other implementation involved, for ambiguity rejections.
    pub conflicting: Option<FunctionId>,
}

/// A suggested fix, in recommendation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedFix {
    /// Human-readable suggestion.
    pub message: String,
}

impl SuggestedFix {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A dispatch candidate as rendered in diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInfo {
    /// The implementation id.
    pub function: FunctionId,
    /// Qualified `module::name`.
    pub qualified_name: String,
    /// Rendered parameter type names.
    pub param_types: Vec<String>,
    /// Definition site.
    pub span: SourceSpan,
    /// Specificity rank.
    pub specificity_rank: u32,
}

impl CandidateInfo {
    fn from_impl(imp: &Implementation, registry: &TypeRegistry) -> Self {
        Self {
            function: imp.id(),
            qualified_name: imp.qualified_name(),
            param_types: imp
                .params()
                .iter()
                .map(|&t| registry.type_name(t).to_owned())
                .collect(),
            span: imp.span().clone(),
            specificity_rank: imp.specificity_rank(),
        }
    }

    fn signature_line(&self) -> String {
        format!("{}({})", self.qualified_name, self.param_types.join(", "))
    }
}

/// An ambiguous-dispatch error record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousDispatch {
    /// The called signature name.
    pub signature_name: String,
    /// Argument type ids at the call.
    pub arg_types: Vec<TypeId>,
    /// Rendered argument type names.
    pub arg_type_names: Vec<String>,
    /// The call site.
    pub call_site: SourceSpan,
    /// The conflicting candidates.
    pub conflicting: Vec<CandidateInfo>,
    /// Pairwise specificity analysis over the conflicting candidates.
    pub specificity_analysis: Vec<PairwiseSpecificity>,
    /// Ordered fix suggestions.
    pub suggested_fixes: Vec<SuggestedFix>,
}

/// A no-matching-implementation error record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoMatchingImplementation {
    /// The called signature name.
    pub signature_name: String,
    /// Argument type ids at the call.
    pub arg_types: Vec<TypeId>,
    /// Rendered argument type names.
    pub arg_type_names: Vec<String>,
    /// The call site.
    pub call_site: SourceSpan,
    /// Every implementation in the group, as context.
    pub available: Vec<CandidateInfo>,
    /// Per-candidate rejection analysis.
    pub rejections: Vec<RejectionInfo>,
    /// Ordered fix suggestions.
    pub suggested_fixes: Vec<SuggestedFix>,
}

/// A duplicate-implementation report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateImplementation {
    /// Qualified name of the duplicated definition.
    pub qualified_name: String,
    /// Span of the rejected (later) definition.
    pub span: SourceSpan,
}

/// A circular-dependency report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularDependencyReport {
    /// `(dependent, dependency)` unit pairs on the cycle, rendered by name.
    pub cycle: Vec<(String, String)>,
}

/// A dispatch-cost performance hint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceHint {
    /// The called signature name.
    pub signature_name: String,
    /// The call site.
    pub call_site: SourceSpan,
    /// Estimated dispatch cost in cycles.
    pub estimated_cost: u32,
    /// The chosen strategy, rendered.
    pub strategy: String,
    /// Hint severity.
    pub severity: Severity,
}

/// A diagnostic recorded on behalf of an adjacent subsystem (device layer,
/// capability checker) through the core's channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemDiagnostic {
    /// Numeric code within the subsystem range.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
    /// Source span, when one exists.
    pub span: Option<SourceSpan>,
}

/// Any diagnostic the engine can emit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// `S1101`.
    Ambiguous(AmbiguousDispatch),
    /// `S1102`.
    NoMatch(NoMatchingImplementation),
    /// `S1103`.
    Duplicate(DuplicateImplementation),
    /// `S1201`.
    Performance(PerformanceHint),
    /// `S1301`.
    Circular(CircularDependencyReport),
    /// `NPUxxx` passthrough.
    Subsystem(SubsystemDiagnostic),
}

impl Diagnostic {
    /// The diagnostic's stable code.
    #[must_use]
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::Ambiguous(_) => DiagnosticCode::AmbiguousDispatch,
            Self::NoMatch(_) => DiagnosticCode::NoMatchingImplementation,
            Self::Duplicate(_) => DiagnosticCode::DuplicateImplementation,
            Self::Performance(_) => DiagnosticCode::PerformanceHint,
            Self::Circular(_) => DiagnosticCode::CircularDependency,
            Self::Subsystem(record) => DiagnosticCode::Subsystem(record.code),
        }
    }

    /// The diagnostic's severity.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Ambiguous(_) | Self::NoMatch(_) | Self::Circular(_) => Severity::Error,
            Self::Duplicate(_) => Severity::Warning,
            Self::Performance(hint) => hint.severity,
            Self::Subsystem(_) => Severity::Error,
        }
    }

    /// The primary span, when the diagnostic has one.
    #[must_use]
    pub fn span(&self) -> Option<&SourceSpan> {
        match self {
            Self::Ambiguous(record) => Some(&record.call_site),
            Self::NoMatch(record) => Some(&record.call_site),
            Self::Duplicate(record) => Some(&record.span),
            Self::Performance(hint) => Some(&hint.call_site),
            Self::Circular(_) => None,
            Self::Subsystem(record) => record.span.as_ref(),
        }
    }

    /// Renders the diagnostic as user-facing text.
    ///
    /// Pure: the output depends only on the record.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Ambiguous(record) => {
                let _ = writeln!(
                    out,
                    "error[S1101]: ambiguous dispatch of `{}({})` at {}",
                    record.signature_name,
                    record.arg_type_names.join(", "),
                    record.call_site,
                );
                let _ = writeln!(out, "  conflicting candidates:");
                for candidate in &record.conflicting {
                    let _ = writeln!(
                        out,
                        "    {} (rank {}) at {}",
                        candidate.signature_line(),
                        candidate.specificity_rank,
                        candidate.span,
                    );
                }
                if !record.specificity_analysis.is_empty() {
                    let _ = writeln!(out, "  specificity analysis:");
                    for pair in &record.specificity_analysis {
                        let _ = writeln!(
                            out,
                            "    {} vs {}: {:?} ({})",
                            pair.left,
                            pair.right,
                            pair.verdict,
                            pair.params
                                .iter()
                                .map(|r| format!("{r:?}"))
                                .collect::<Vec<_>>()
                                .join(", "),
                        );
                    }
                }
                render_fixes(&mut out, &record.suggested_fixes);
            }
            Self::NoMatch(record) => {
                let _ = writeln!(
                    out,
                    "error[S1102]: no implementation of `{}` matches ({}) at {}",
                    record.signature_name,
                    record.arg_type_names.join(", "),
                    record.call_site,
                );
                if record.available.is_empty() {
                    let _ = writeln!(out, "  no implementations are in scope");
                } else {
                    let _ = writeln!(out, "  available implementations:");
                    for candidate in &record.available {
                        let _ = writeln!(
                            out,
                            "    {} at {}",
                            candidate.signature_line(),
                            candidate.span
                        );
                    }
                }
                for rejection in &record.rejections {
                    match (
                        rejection.parameter_index,
                        &rejection.expected,
                        &rejection.actual,
                    ) {
                        (Some(index), Some(expected), Some(actual)) => {
                            let _ = writeln!(
                                out,
                                "  {} rejected: {:?} at parameter {index} (expected `{expected}`, found `{actual}`)",
                                rejection.qualified_name, rejection.reason,
                            );
                        }
                        _ => {
                            let _ = writeln!(
                                out,
                                "  {} rejected: {:?}",
                                rejection.qualified_name, rejection.reason,
                            );
                        }
                    }
                }
                render_fixes(&mut out, &record.suggested_fixes);
            }
            Self::Duplicate(record) => {
                let _ = writeln!(
                    out,
                    "warning[S1103]: duplicate implementation of `{}` at {} (later definition rejected)",
                    record.qualified_name, record.span,
                );
            }
            Self::Performance(hint) => {
                let level = match hint.severity {
                    Severity::Info => "info",
                    Severity::Warning => "warning",
                    Severity::Error => "error",
                };
                let _ = writeln!(
                    out,
                    "{level}[S1201]: dispatch of `{}` at {} costs ~{} cycles via {}",
                    hint.signature_name, hint.call_site, hint.estimated_cost, hint.strategy,
                );
            }
            Self::Circular(record) => {
                let _ = writeln!(out, "error[S1301]: circular dependency between units:");
                for (dependent, dependency) in &record.cycle {
                    let _ = writeln!(out, "    {dependent} -> {dependency}");
                }
            }
            Self::Subsystem(record) => {
                let _ = write!(out, "error[NPU{:03}]: {}", record.code, record.message);
                if let Some(span) = &record.span {
                    let _ = write!(out, " at {span}");
                }
                let _ = writeln!(out);
            }
        }
        out
    }
}

fn render_fixes(out: &mut String, fixes: &[SuggestedFix]) {
    if fixes.is_empty() {
        return;
    }
    let _ = writeln!(out, "  suggested fixes:");
    for (i, fix) in fixes.iter().enumerate() {
        let _ = writeln!(out, "    {}. {}", i + 1, fix.message);
    }
}

/// Builds the pairwise specificity analysis for a candidate set.
#[must_use]
pub fn pairwise_analysis(
    candidates: &[&Implementation],
    registry: &TypeRegistry,
) -> Vec<PairwiseSpecificity> {
    let mut pairs = Vec::new();
    for (i, &left) in candidates.iter().enumerate() {
        for &right in &candidates[i + 1..] {
            let params: Vec<ParamRelation> = left
                .params()
                .iter()
                .zip(right.params())
                .map(|(&l, &r)| {
                    if l == r {
                        ParamRelation::Identical
                    } else if registry.is_subtype(l, r) {
                        ParamRelation::LeftNarrower
                    } else if registry.is_subtype(r, l) {
                        ParamRelation::RightNarrower
                    } else {
                        ParamRelation::Unrelated
                    }
                })
                .collect();
            let left_le = params
                .iter()
                .all(|r| matches!(r, ParamRelation::Identical | ParamRelation::LeftNarrower));
            let right_le = params
                .iter()
                .all(|r| matches!(r, ParamRelation::Identical | ParamRelation::RightNarrower));
            let verdict = match (left_le, right_le) {
                (true, true) => SpecificityVerdict::Equal,
                (true, false) => SpecificityVerdict::LeftMoreSpecific,
                (false, true) => SpecificityVerdict::RightMoreSpecific,
                (false, false) => SpecificityVerdict::Incomparable,
            };
            pairs.push(PairwiseSpecificity {
                left: left.qualified_name(),
                right: right.qualified_name(),
                params,
                verdict,
            });
        }
    }
    pairs
}

/// Builds an [`AmbiguousDispatch`] record for a call.
#[must_use]
pub fn report_ambiguous(
    signature_name: &str,
    args: &[TypeId],
    call_site: SourceSpan,
    conflicting: &[&Implementation],
    registry: &TypeRegistry,
) -> AmbiguousDispatch {
    let first_divergent = (0..args.len()).find(|&i| {
        let mut param_types = conflicting.iter().map(|imp| imp.params()[i]);
        let first = param_types.next();
        param_types.any(|t| Some(t) != first)
    });

    let mut fixes = vec![SuggestedFix::new(
        "make one implementation strictly more specific than the others",
    )];
    for imp in conflicting {
        fixes.push(SuggestedFix::new(format!(
            "use a qualified call: `{}(...)`",
            imp.qualified_name(),
        )));
    }
    if let Some(index) = first_divergent {
        fixes.push(SuggestedFix::new(format!(
            "add an explicit type annotation on argument {}",
            index + 1,
        )));
    }

    AmbiguousDispatch {
        signature_name: signature_name.to_owned(),
        arg_types: args.to_vec(),
        arg_type_names: args.iter().map(|&t| registry.type_name(t).to_owned()).collect(),
        call_site,
        conflicting: conflicting
            .iter()
            .map(|imp| CandidateInfo::from_impl(imp, registry))
            .collect(),
        specificity_analysis: pairwise_analysis(conflicting, registry),
        suggested_fixes: fixes,
    }
}

/// Builds a [`NoMatchingImplementation`] record for a call.
#[must_use]
pub fn report_no_match(
    signature_name: &str,
    args: &[TypeId],
    call_site: SourceSpan,
    available: &[Implementation],
    registry: &TypeRegistry,
) -> NoMatchingImplementation {
    let rejections: Vec<RejectionInfo> = available
        .iter()
        .map(|imp| reject_candidate(imp, args, registry))
        .collect();

    let arg_type_names: Vec<String> = args
        .iter()
        .map(|&t| registry.type_name(t).to_owned())
        .collect();
    let fixes = vec![
        SuggestedFix::new(format!(
            "add an implementation matching `{signature_name}({})`",
            arg_type_names.join(", "),
        )),
        SuggestedFix::new("use an explicit conversion on the mismatched argument"),
        SuggestedFix::new("verify the defining module is imported"),
    ];

    NoMatchingImplementation {
        signature_name: signature_name.to_owned(),
        arg_types: args.to_vec(),
        arg_type_names,
        call_site,
        available: available
            .iter()
            .map(|imp| CandidateInfo::from_impl(imp, registry))
            .collect(),
        rejections,
        suggested_fixes: fixes,
    }
}

fn reject_candidate(
    imp: &Implementation,
    args: &[TypeId],
    registry: &TypeRegistry,
) -> RejectionInfo {
    if imp.arity() != args.len() {
        return RejectionInfo {
            function: imp.id(),
            qualified_name: imp.qualified_name(),
            reason: RejectionReason::TypeMismatch,
            parameter_index: None,
            expected: None,
            actual: None,
            conflicting: None,
        };
    }
    for (index, (&param, &arg)) in imp.params().iter().zip(args).enumerate() {
        if registry.is_subtype(arg, param) {
            continue;
        }
        let reason = if registry.is_subtype(param, arg) {
            RejectionReason::InsufficientSpecificity
        } else {
            RejectionReason::TypeMismatch
        };
        return RejectionInfo {
            function: imp.id(),
            qualified_name: imp.qualified_name(),
            reason,
            parameter_index: Some(index),
            expected: Some(registry.type_name(param).to_owned()),
            actual: Some(registry.type_name(arg).to_owned()),
            conflicting: None,
        };
    }
    // Applicable but dominated or tied: rejected by specificity, not types.
    RejectionInfo {
        function: imp.id(),
        qualified_name: imp.qualified_name(),
        reason: RejectionReason::AmbiguousWithOther,
        parameter_index: None,
        expected: None,
        actual: None,
        conflicting: None,
    }
}

/// Accumulates diagnostics for a session.
///
/// Per-site errors land here and analysis continues; the driver inspects the
/// sink when the session ends.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic and returns its handle.
    pub fn push(&mut self, diagnostic: Diagnostic) -> DiagnosticId {
        let id = DiagnosticId(
            u32::try_from(self.diagnostics.len()).expect("diagnostic sink exceeds u32"),
        );
        self.diagnostics.push(diagnostic);
        id
    }

    /// Fetches a diagnostic by handle.
    #[must_use]
    pub fn get(&self, id: DiagnosticId) -> Option<&Diagnostic> {
        self.diagnostics.get(id.0 as usize)
    }

    /// All diagnostics in emission order.
    #[must_use]
    pub fn all(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of error-severity diagnostics.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity() == Severity::Error)
            .count()
    }

    /// Whether any error-severity diagnostic was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}
