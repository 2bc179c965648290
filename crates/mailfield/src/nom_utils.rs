use crate::error::FieldParseError;
use nom::error::{ContextError, ErrorKind};
use nom_locate::LocatedSpan;
use std::fmt::{Debug, Write};

pub(crate) type Span<'a> = LocatedSpan<&'a str>;
pub(crate) type IResult<'a, A, B> = nom::IResult<A, B, ParseError<Span<'a>>>;

pub(crate) fn make_span(s: &str) -> Span {
    Span::new(s)
}

#[derive(Debug)]
pub(crate) enum ParseErrorKind {
    Context(&'static str),
    Char(char),
    Nom(ErrorKind),
    External { kind: ErrorKind, reason: String },
}

#[derive(Debug)]
pub(crate) struct ParseError<I: Debug> {
    pub errors: Vec<(I, ParseErrorKind)>,
}

impl<I: Debug> ParseError<I> {
    /// Contexts are pushed as the error unwinds, so the last one
    /// recorded names the grammar element the caller asked for.
    pub fn outermost_context(&self) -> Option<&'static str> {
        self.errors.iter().rev().find_map(|(_, kind)| match kind {
            ParseErrorKind::Context(ctx) => Some(*ctx),
            _ => None,
        })
    }
}

impl<I: Debug> ContextError<I> for ParseError<I> {
    fn add_context(input: I, ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, ParseErrorKind::Context(ctx)));
        other
    }
}

impl<I: Debug> nom::error::ParseError<I> for ParseError<I> {
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        Self {
            errors: vec![(input, ParseErrorKind::Nom(kind))],
        }
    }

    fn append(input: I, kind: ErrorKind, mut other: Self) -> Self {
        other.errors.push((input, ParseErrorKind::Nom(kind)));
        other
    }

    fn from_char(input: I, c: char) -> Self {
        Self {
            errors: vec![(input, ParseErrorKind::Char(c))],
        }
    }
}

impl<I: Debug, E: std::fmt::Display> nom::error::FromExternalError<I, E> for ParseError<I> {
    fn from_external_error(input: I, kind: ErrorKind, err: E) -> Self {
        Self {
            errors: vec![(
                input,
                ParseErrorKind::External {
                    kind,
                    reason: format!("{err:#}"),
                },
            )],
        }
    }
}

pub(crate) fn make_context_error<'a, S: Into<String>>(
    input: Span<'a>,
    reason: S,
) -> nom::Err<ParseError<Span<'a>>> {
    nom::Err::Error(ParseError {
        errors: vec![(
            input,
            ParseErrorKind::External {
                kind: ErrorKind::Fail,
                reason: reason.into(),
            },
        )],
    })
}

/// Field values are unfolded before they reach a grammar, so
/// errors are reported against a single line using a column
/// and a caret marking the offending region.
pub(crate) fn explain_nom(input: Span, err: &ParseError<Span<'_>>) -> String {
    let mut result = String::new();
    for (i, (span, kind)) in err.errors.iter().enumerate() {
        let column = span.get_utf8_column();
        let mut caret = " ".repeat(column.saturating_sub(1));
        caret.push('^');

        let what = match kind {
            ParseErrorKind::Char(expected) => match span.fragment().chars().next() {
                Some(actual) => format!("expected '{expected}', found '{actual}'"),
                None => format!("expected '{expected}', got end of input"),
            },
            ParseErrorKind::Context(context) => format!("in {context}"),
            ParseErrorKind::External { kind, reason } => format!("{reason} {kind:?}"),
            ParseErrorKind::Nom(nom_err) => format!("in {nom_err:?}"),
        };

        if input.is_empty() {
            write!(&mut result, "{i}: {what}, got empty input\n").ok();
        } else {
            write!(
                &mut result,
                "{i}: at column {column}, {what}:\n{}\n{caret}\n",
                input.fragment()
            )
            .ok();
        }
    }
    result
}

pub(crate) fn to_field_error(
    input: Span,
    element: &'static str,
    err: nom::Err<ParseError<Span<'_>>>,
) -> FieldParseError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let element = e.outermost_context().unwrap_or(element);
            FieldParseError::new(element, *input.fragment(), explain_nom(input, &e))
        }
        nom::Err::Incomplete(needed) => FieldParseError::new(
            element,
            *input.fragment(),
            format!("incomplete input: {needed:?}"),
        ),
    }
}
