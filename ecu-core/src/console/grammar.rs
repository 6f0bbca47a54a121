//! Lexer and parser for console command lines.
//!
//! `regal` turns a line into a bounded token buffer; `winnow` parsers then
//! walk the tokens. Nothing here allocates, so the firmware can parse
//! commands arriving over its debug link with the same code the emulator
//! uses.

use core::fmt;
use core::ops::Range;
use core::str::FromStr;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use crate::config::TriggerFilter;
use crate::decoders::DecoderKind;

use super::catalog::{self, CommandTag};

/// Longest accepted command, in tokens.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    #[regex(r"[0-9]+")]
    Integer,
    /// Pattern names that start with a digit, such as `36-2-1` or `4g63`.
    #[regex(r"[0-9]+[A-Za-z-][A-Za-z0-9-]*")]
    Name,
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    TooManyTokens,
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens => write!(f, "more than {MAX_TOKENS} tokens"),
            LexError::Engine => f.write_str("lexer engine error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarError<'a> {
    Unexpected {
        expected: &'static str,
        found: Option<&'a str>,
        span: Option<Range<usize>>,
    },
    InvalidInteger {
        span: Range<usize>,
    },
    UnknownPattern {
        name: &'a str,
    },
    InvalidToken {
        lexeme: &'a str,
        span: Range<usize>,
    },
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError::Unexpected {
            expected,
            found: token.map(|token| token.lexeme),
            span: token.map(|token| token.span.clone()),
        }
    }
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::Unexpected {
                expected,
                found: Some(found),
                ..
            } if !found.trim().is_empty() => write!(f, "expected {expected}, found `{found}`"),
            GrammarError::Unexpected { expected, .. } => write!(f, "expected {expected}"),
            GrammarError::InvalidInteger { span } => write!(f, "integer out of range at {span:?}"),
            GrammarError::UnknownPattern { name } => write!(f, "unknown trigger pattern `{name}`"),
            GrammarError::InvalidToken { lexeme, span } => {
                write!(f, "unsupported character `{lexeme}` at {span:?}")
            }
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputBank {
    Fuel,
    Ignition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleCommand {
    pub bank: OutputBank,
    pub channel: u8,
    pub delay: u32,
    pub duration: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogCommand {
    Tooth,
    Composite,
    Off,
    Dump,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Pattern(DecoderKind),
    Teeth { teeth: u16, missing: u8 },
    Rpm(u16),
    Run(u16),
    Step(u16),
    Status,
    Angle,
    Filter(TriggerFilter),
    Schedule(ScheduleCommand),
    Log(LogCommand),
    Reset,
    Help(Option<&'a str>),
}

const FILTERS: [(&str, TriggerFilter); 4] = [
    ("off", TriggerFilter::Off),
    ("lite", TriggerFilter::Lite),
    ("medium", TriggerFilter::Medium),
    ("aggressive", TriggerFilter::Aggressive),
];

const BANKS: [(&str, OutputBank); 2] = [("fuel", OutputBank::Fuel), ("ign", OutputBank::Ignition)];

const LOG_ACTIONS: [(&str, LogCommand); 4] = [
    ("on", LogCommand::Tooth),
    ("composite", LogCommand::Composite),
    ("off", LogCommand::Off),
    ("dump", LogCommand::Dump),
];

/// Splits `line` into tokens.
///
/// # Errors
///
/// Fails when the line holds more than [`MAX_TOKENS`] tokens.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache.rebuild(compiled, line).map_err(|error| match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens,
        _ => LexError::Engine,
    })?;

    let mut buffer = TokenBuffer::new();
    let mut push = |kind, span: Range<usize>| {
        let lexeme = &line[span.clone()];
        buffer
            .push(Token { kind, lexeme, span })
            .map_err(|_| LexError::TooManyTokens)
    };
    for record in cache.tokens() {
        if !record.skipped {
            push(record.token, record.start..record.end)?;
        }
    }
    // Input the lexer could not finish becomes a single error token.
    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        push(TokenKind::Error, partial.start..partial.start + partial.fragment.len())?;
    }
    Ok(buffer)
}

/// Parses one command line.
///
/// # Errors
///
/// Reports the first token that does not fit the command grammar.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;
    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::InvalidToken {
            lexeme: token.lexeme,
            span: token.span.clone(),
        }));
    }

    let mut input = tokens.as_slice();
    let command = match command().parse_next(&mut input) {
        Ok(command) => command,
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => return Err(ParseError::Grammar(err)),
        Err(ErrMode::Incomplete(_)) => {
            return Err(ParseError::Grammar(GrammarError::unexpected("token", input.first())));
        }
    };
    match input.iter().find(|token| token.kind != TokenKind::Eol) {
        Some(token) => Err(ParseError::Grammar(GrammarError::unexpected(
            "end of command",
            Some(token),
        ))),
        None => Ok(command),
    }
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let keyword = expect_kind(TokenKind::Ident, "command").parse_next(input)?;
        let Some(spec) = catalog::find(keyword.lexeme) else {
            return Err(ErrMode::Cut(GrammarError::unexpected("command", Some(&keyword))));
        };
        match spec.tag {
            CommandTag::Pattern => pattern().parse_next(input).map(Command::Pattern),
            CommandTag::Teeth => {
                let teeth = integer("tooth count").parse_next(input)?;
                let missing = integer("missing teeth").parse_next(input)?;
                Ok(Command::Teeth { teeth, missing })
            }
            CommandTag::Rpm => integer("engine speed").parse_next(input).map(Command::Rpm),
            CommandTag::Run => integer("revolutions").parse_next(input).map(Command::Run),
            CommandTag::Step => Ok(Command::Step(optional_integer(input)?.unwrap_or(1))),
            CommandTag::Status => Ok(Command::Status),
            CommandTag::Angle => Ok(Command::Angle),
            CommandTag::Filter => choice(&FILTERS, "filter level").parse_next(input).map(Command::Filter),
            CommandTag::Schedule => {
                let bank = choice(&BANKS, "fuel or ign").parse_next(input)?;
                let channel = integer("channel").parse_next(input)?;
                let delay = integer("delay").parse_next(input)?;
                let duration = integer("duration").parse_next(input)?;
                Ok(Command::Schedule(ScheduleCommand {
                    bank,
                    channel,
                    delay,
                    duration,
                }))
            }
            CommandTag::Log => choice(&LOG_ACTIONS, "log action").parse_next(input).map(Command::Log),
            CommandTag::Reset => Ok(Command::Reset),
            CommandTag::Help => Ok(Command::Help(optional_ident(input))),
        }
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        other => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            other.map(|(token, _)| token),
        ))),
    }
}

fn integer<'src, 'slice, T: FromStr>(
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, T, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = expect_kind(TokenKind::Integer, label).parse_next(input)?;
        token.lexeme.parse::<T>().map_err(|_| {
            ErrMode::Cut(GrammarError::InvalidInteger {
                span: token.span.clone(),
            })
        })
    }
}

fn optional_integer<'src, T: FromStr>(input: &mut Input<'src, '_>) -> Result<Option<T>, ErrMode<GrammarError<'src>>> {
    match input.first() {
        Some(token) if token.kind == TokenKind::Integer => integer("integer").parse_next(input).map(Some),
        _ => Ok(None),
    }
}

fn optional_ident<'src>(input: &mut Input<'src, '_>) -> Option<&'src str> {
    let (token, rest) = input.split_first()?;
    if token.kind != TokenKind::Ident {
        return None;
    }
    *input = rest;
    Some(token.lexeme)
}

/// One keyword out of a fixed table.
fn choice<'src, 'slice, T: Copy>(
    choices: &'static [(&'static str, T)],
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, T, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = expect_kind(TokenKind::Ident, label).parse_next(input)?;
        choices
            .iter()
            .find(|(keyword, _)| keyword.eq_ignore_ascii_case(token.lexeme))
            .map(|&(_, value)| value)
            .ok_or_else(|| ErrMode::Cut(GrammarError::unexpected(label, Some(&token))))
    }
}

/// Trigger pattern by console name or persisted numeric id.
fn pattern<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, DecoderKind, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let Some((token, rest)) = input.split_first() else {
            return Err(ErrMode::Backtrack(GrammarError::unexpected("pattern", None)));
        };
        let kind = match token.kind {
            TokenKind::Integer => token.lexeme.parse().ok().and_then(DecoderKind::from_id),
            TokenKind::Ident | TokenKind::Name => DecoderKind::from_name(token.lexeme),
            _ => return Err(ErrMode::Backtrack(GrammarError::unexpected("pattern", Some(token)))),
        };
        *input = rest;
        kind.ok_or(ErrMode::Cut(GrammarError::UnknownPattern { name: token.lexeme }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(line: &str) -> Command<'_> {
        parse(line).expect("command should parse")
    }

    #[test]
    fn patterns_by_name_and_id() {
        assert_eq!(parse_ok("pattern missing-tooth"), Command::Pattern(DecoderKind::MissingTooth));
        assert_eq!(parse_ok("pattern 36-2-1"), Command::Pattern(DecoderKind::ThirtySixMinus21));
        assert_eq!(parse_ok("pattern 4G63"), Command::Pattern(DecoderKind::Mitsubishi4G63));
        assert_eq!(parse_ok("pattern 22"), Command::Pattern(DecoderKind::ChryslerNgc));
    }

    #[test]
    fn unknown_pattern_is_reported() {
        match parse("pattern 99") {
            Err(ParseError::Grammar(GrammarError::UnknownPattern { name })) => assert_eq!(name, "99"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn wheel_and_speed_arguments() {
        assert_eq!(parse_ok("teeth 60 2"), Command::Teeth { teeth: 60, missing: 2 });
        assert_eq!(parse_ok("rpm 3000\n"), Command::Rpm(3000));
        assert_eq!(parse_ok("run 10"), Command::Run(10));
    }

    #[test]
    fn step_defaults_to_one_edge() {
        assert_eq!(parse_ok("step"), Command::Step(1));
        assert_eq!(parse_ok("step 7"), Command::Step(7));
    }

    #[test]
    fn schedule_request() {
        assert_eq!(
            parse_ok("schedule ign 2 1000 3500"),
            Command::Schedule(ScheduleCommand {
                bank: OutputBank::Ignition,
                channel: 2,
                delay: 1000,
                duration: 3500,
            })
        );
        assert!(parse("schedule spark 0 10 10").is_err());
    }

    #[test]
    fn keywords_ignore_case() {
        assert_eq!(parse_ok("FILTER Aggressive"), Command::Filter(TriggerFilter::Aggressive));
        assert_eq!(parse_ok("Log Dump"), Command::Log(LogCommand::Dump));
        assert_eq!(parse_ok("help schedule"), Command::Help(Some("schedule")));
        assert_eq!(parse_ok("help"), Command::Help(None));
    }

    #[test]
    fn out_of_range_integer_is_rejected() {
        assert!(matches!(
            parse("teeth 60 300"),
            Err(ParseError::Grammar(GrammarError::InvalidInteger { .. }))
        ));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        match parse("status now") {
            Err(ParseError::Grammar(GrammarError::Unexpected { expected, found, .. })) => {
                assert_eq!(expected, "end of command");
                assert_eq!(found, Some("now"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn stray_symbol_is_an_invalid_token() {
        assert!(matches!(
            parse("rpm 3000$"),
            Err(ParseError::Grammar(GrammarError::InvalidToken { lexeme: "$", .. }))
        ));
    }
}
