//! Span helpers.

use proc_macro2::Span;

/// Join multiple spans into one.
pub fn join_spans(spans: impl IntoIterator<Item = Span>) -> Span {
    let mut spans = spans.into_iter();
    let fst = spans.next().unwrap_or(Span::call_site());
    spans
        .try_fold(fst, |acc, next| acc.join(next))
        .unwrap_or(fst)
}

/// One-based line and one-based column of the start of a span.
pub fn line_col(span: Span) -> (usize, usize) {
    let start = span.start();
    (start.line, start.column + 1)
}
