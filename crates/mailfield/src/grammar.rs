use crate::error::FieldParseError;
use crate::nom_utils::{make_context_error, make_span, to_field_error, IResult, Span};
use crate::options::FieldOptions;
use crate::rfc2047::{self, EncodedWord};
use crate::structured::EncodeHeaderValue;
use charset::Charset;
use chrono::{DateTime, FixedOffset};
use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1};
use nom::character::complete::{char, satisfy};
use nom::combinator::{all_consuming, map, opt, recognize};
use nom::error::context;
use nom::multi::{many0, many1, separated_list1};
use nom::sequence::{delimited, preceded, separated_pair, terminated, tuple};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, FieldParseError>;

fn is_utf8_non_ascii(c: char) -> bool {
    let c = c as u32;
    c == 0 || c >= 0x80
}

// ctl = { '\u{00}'..'\u{1f}' | "\u{7f}" }
fn is_ctl(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1f}' | '\u{7f}')
}

fn is_char(c: char) -> bool {
    matches!(c, '\u{01}'..='\u{7f}')
}

// vchar = { '\u{21}'..'\u{7e}' | utf8_non_ascii }
fn is_vchar(c: char) -> bool {
    matches!(c, '\u{21}'..='\u{7e}') || is_utf8_non_ascii(c)
}

pub(crate) fn is_atext(c: char) -> bool {
    match c {
        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
        | '`' | '{' | '|' | '}' | '~' => true,
        c => c.is_ascii_alphanumeric() || is_utf8_non_ascii(c),
    }
}

fn atext(input: Span) -> IResult<Span, Span> {
    context("atext", take_while1(is_atext))(input)
}

fn is_obs_no_ws_ctl(c: char) -> bool {
    matches!(
        c,
        '\u{01}'..='\u{08}' | '\u{0b}'..='\u{0c}' | '\u{0e}'..='\u{1f}' | '\u{7f}'
    )
}

// ctext = { '\u{21}'..'\u{27}' | '\u{2a}'..'\u{5b}' | '\u{5d}'..'\u{7e}' | obs_ctext | utf8_non_ascii }
fn is_ctext(c: char) -> bool {
    match c {
        '\u{21}'..='\u{27}' | '\u{2a}'..='\u{5b}' | '\u{5d}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

// dtext = { '\u{21}'..'\u{5a}' | '\u{5e}'..'\u{7e}' | obs_dtext | utf8_non_ascii }
fn is_dtext(c: char) -> bool {
    match c {
        '\u{21}'..='\u{5a}' | '\u{5e}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

// qtext = { "\u{21}" | '\u{23}'..'\u{5b}' | '\u{5d}'..'\u{7e}' | obs_qtext | utf8_non_ascii }
fn is_qtext(c: char) -> bool {
    match c {
        '\u{21}' | '\u{23}'..='\u{5b}' | '\u{5d}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

fn is_tspecial(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
    )
}

fn is_attribute_char(c: char) -> bool {
    match c {
        ' ' | '*' | '\'' | '%' => false,
        _ => is_char(c) && !is_ctl(c) && !is_tspecial(c),
    }
}

/// token from RFC 2045
pub(crate) fn is_mime_token(c: char) -> bool {
    is_char(c) && c != ' ' && !is_ctl(c) && !is_tspecial(c)
}

fn wsp(input: Span) -> IResult<Span, Span> {
    context("wsp", take_while1(|c| c == ' ' || c == '\t'))(input)
}

fn newline(input: Span) -> IResult<Span, Span> {
    context("newline", recognize(preceded(opt(char('\r')), char('\n'))))(input)
}

// fws = { ((wsp* ~ "\r"? ~ "\n")* ~ wsp+) | obs_fws }
fn fws(input: Span) -> IResult<Span, Span> {
    context(
        "fws",
        recognize(preceded(many0(preceded(opt(wsp), newline)), wsp)),
    )(input)
}

// cfws = { ( (fws? ~ comment)+ ~ fws?) | fws }
fn cfws(input: Span) -> IResult<Span, Span> {
    context(
        "cfws",
        recognize(alt((
            recognize(tuple((many1(tuple((opt(fws), comment))), opt(fws)))),
            fws,
        ))),
    )(input)
}

// comment = { "(" ~ (fws? ~ ccontent)* ~ fws? ~ ")" }
fn comment(input: Span) -> IResult<Span, Span> {
    context(
        "comment",
        recognize(tuple((
            char('('),
            many0(tuple((opt(fws), ccontent))),
            opt(fws),
            char(')'),
        ))),
    )(input)
}

// ccontent = { ctext | quoted_pair | comment }
fn ccontent(input: Span) -> IResult<Span, Span> {
    context(
        "ccontent",
        alt((
            recognize(satisfy(is_ctext)),
            recognize(quoted_pair),
            comment,
        )),
    )(input)
}

fn is_quoted_pair(c: char) -> bool {
    match c {
        '\u{00}' | '\r' | '\n' | ' ' | '\t' => true,
        c => is_obs_no_ws_ctl(c) || is_vchar(c),
    }
}

// quoted_pair = { ( "\\"  ~ (vchar | wsp)) | obs_qp }
fn quoted_pair(input: Span) -> IResult<Span, char> {
    context("quoted_pair", preceded(char('\\'), satisfy(is_quoted_pair)))(input)
}

// quoted_string = { cfws? ~ "\"" ~ (fws? ~ qcontent)* ~ fws? ~ "\"" ~ cfws? }
fn quoted_string(input: Span) -> IResult<Span, String> {
    let (loc, (bits, trailer)) = context(
        "quoted_string",
        delimited(
            opt(cfws),
            delimited(
                char('"'),
                tuple((many0(tuple((opt(fws), qcontent))), opt(fws))),
                char('"'),
            ),
            opt(cfws),
        ),
    )(input)?;

    let mut result = String::new();
    for (ws, c) in bits {
        if let Some(ws) = ws {
            result.push_str(&ws);
        }
        result.push(c);
    }
    if let Some(t) = trailer {
        result.push_str(&t);
    }
    Ok((loc, result))
}

// qcontent = { qtext | quoted_pair }
fn qcontent(input: Span) -> IResult<Span, char> {
    context("qcontent", alt((satisfy(is_qtext), quoted_pair)))(input)
}

// atom = { cfws? ~ atext ~ cfws? }
fn atom(input: Span) -> IResult<Span, String> {
    let (loc, text) = context("atom", delimited(opt(cfws), atext, opt(cfws)))(input)?;
    Ok((loc, text.to_string()))
}

// word = { atom | quoted_string }
fn word(input: Span) -> IResult<Span, String> {
    context("word", alt((atom, quoted_string)))(input)
}

// dot_atom_text = @{ atext ~ ("." ~ atext)* }
fn dot_atom_text(input: Span) -> IResult<Span, String> {
    let (loc, text) = context(
        "dot_atom_text",
        recognize(tuple((atext, many0(preceded(char('.'), atext))))),
    )(input)?;
    Ok((loc, text.to_string()))
}

// dot_atom = { cfws? ~ dot_atom_text ~ cfws? }
fn dot_atom(input: Span) -> IResult<Span, String> {
    context("dot_atom", delimited(opt(cfws), dot_atom_text, opt(cfws)))(input)
}

// obs_local_part = { word ~ (dot ~ word)* }
fn obs_local_part(input: Span) -> IResult<Span, String> {
    let (loc, (first, rest)) = context(
        "obs_local_part",
        tuple((word, many0(preceded(char('.'), word)))),
    )(input)?;
    let mut result = first;
    for w in rest {
        result.push('.');
        result.push_str(&w);
    }
    Ok((loc, result))
}

// local_part = { dot_atom | quoted_string | obs_local_part }
fn local_part(input: Span) -> IResult<Span, String> {
    context("local_part", alt((dot_atom, quoted_string, obs_local_part)))(input)
}

// domain_literal = { cfws? ~ "[" ~ (fws? ~ dtext)* ~ fws? ~ "]" ~ cfws? }
fn domain_literal(input: Span) -> IResult<Span, String> {
    let (loc, bits) = context(
        "domain_literal",
        delimited(
            opt(cfws),
            delimited(
                char('['),
                terminated(
                    many0(preceded(opt(fws), alt((satisfy(is_dtext), quoted_pair)))),
                    opt(fws),
                ),
                char(']'),
            ),
            opt(cfws),
        ),
    )(input)?;

    let mut result = String::with_capacity(bits.len() + 2);
    result.push('[');
    result.extend(bits);
    result.push(']');
    Ok((loc, result))
}

// obs_domain = { atom ~ ( dot ~ atom)* }
fn obs_domain(input: Span) -> IResult<Span, String> {
    let (loc, (first, rest)) =
        context("obs_domain", tuple((atom, many0(preceded(char('.'), atom)))))(input)?;
    let mut result = first;
    for a in rest {
        result.push('.');
        result.push_str(&a);
    }
    Ok((loc, result))
}

// domain = { dot_atom | domain_literal | obs_domain }
fn domain(input: Span) -> IResult<Span, String> {
    context("domain", alt((dot_atom, domain_literal, obs_domain)))(input)
}

// addr_spec = { local_part ~ "@" ~ domain }
fn addr_spec(input: Span) -> IResult<Span, AddrSpec> {
    let (loc, (local_part, domain)) =
        context("addr_spec", separated_pair(local_part, char('@'), domain))(input)?;
    Ok((loc, AddrSpec { local_part, domain }))
}

// obs_route = { obs_domain_list ~ ":" }
// obs_domain_list = { (cfws | ",")* ~ "@" ~ domain ~ ("," ~ cfws? ~ ("@" ~ domain)?)* }
fn obs_route(input: Span) -> IResult<Span, Span> {
    context(
        "obs_route",
        recognize(terminated(
            tuple((
                many0(alt((cfws, recognize(char(','))))),
                char('@'),
                domain,
                many0(tuple((
                    char(','),
                    opt(cfws),
                    opt(tuple((char('@'), domain))),
                ))),
            )),
            char(':'),
        )),
    )(input)
}

// angle_addr = { cfws? ~ "<" ~ obs_route? ~ addr_spec ~ ">" ~ cfws? }
fn angle_addr(input: Span) -> IResult<Span, AddrSpec> {
    context(
        "angle_addr",
        delimited(
            opt(cfws),
            delimited(char('<'), preceded(opt(obs_route), addr_spec), char('>')),
            opt(cfws),
        ),
    )(input)
}

/// Recognize a single encoded word, returning its raw text.
/// Decoding is deferred so that adjacent words can be decoded
/// together.
fn encoded_word(input: Span) -> IResult<Span, Span> {
    match EncodedWord::parse(input.fragment()) {
        Some(word) => context("encoded_word", take(word.raw.len()))(input),
        None => Err(make_context_error(input, "expected an encoded word")),
    }
}

#[derive(Debug)]
enum PhraseWord {
    Encoded(String),
    Plain(String),
    Dot,
}

fn phrase_word(input: Span) -> IResult<Span, PhraseWord> {
    alt((
        map(
            delimited(opt(cfws), encoded_word, opt(cfws)),
            |w: Span| PhraseWord::Encoded(w.to_string()),
        ),
        map(word, PhraseWord::Plain),
    ))(input)
}

// phrase = { (encoded_word | word)+ | obs_phrase }
// obs_phrase = { (encoded_word | word) ~ (encoded_word | word | dot | cfws)* }
fn phrase(input: Span) -> IResult<Span, String> {
    let (loc, (first, rest)) = context(
        "phrase",
        tuple((
            phrase_word,
            many0(alt((
                map(phrase_word, Some),
                map(char('.'), |_| Some(PhraseWord::Dot)),
                map(cfws, |_| None),
            ))),
        )),
    )(input)?;

    let mut parts: Vec<String> = vec![];
    let mut pending_encoded: Vec<String> = vec![];

    fn flush(pending: &mut Vec<String>, parts: &mut Vec<String>) {
        if !pending.is_empty() {
            parts.push(rfc2047::decode(&pending.join(" ")).into_owned());
            pending.clear();
        }
    }

    for w in std::iter::once(first).chain(rest.into_iter().flatten()) {
        match w {
            PhraseWord::Encoded(raw) => pending_encoded.push(raw),
            PhraseWord::Plain(text) => {
                flush(&mut pending_encoded, &mut parts);
                parts.push(text);
            }
            PhraseWord::Dot => {
                flush(&mut pending_encoded, &mut parts);
                match parts.last_mut() {
                    Some(prior) => prior.push('.'),
                    None => parts.push(".".to_string()),
                }
            }
        }
    }
    flush(&mut pending_encoded, &mut parts);

    Ok((loc, parts.join(" ")))
}

// display_name = { phrase }
fn display_name(input: Span) -> IResult<Span, String> {
    context("display_name", phrase)(input)
}

// name_addr = { display_name? ~ angle_addr }
fn name_addr(input: Span) -> IResult<Span, Mailbox> {
    context(
        "name_addr",
        map(tuple((opt(display_name), angle_addr)), |(name, address)| {
            Mailbox {
                name: name.filter(|n| !n.is_empty()),
                address,
            }
        }),
    )(input)
}

// mailbox = { name_addr | addr_spec }
fn mailbox(input: Span) -> IResult<Span, Mailbox> {
    if let Ok(res) = name_addr(input) {
        Ok(res)
    } else {
        let (loc, address) = context("mailbox", addr_spec)(input)?;
        Ok((
            loc,
            Mailbox {
                name: None,
                address,
            },
        ))
    }
}

// obs_mbox_list = {  ((cfws? ~ ",")* ~ mailbox ~ ("," ~ (mailbox | cfws))*)+ }
fn mailbox_list(input: Span) -> IResult<Span, MailboxList> {
    let (loc, entries) = context(
        "mailbox_list",
        many1(preceded(
            many0(preceded(opt(cfws), char(','))),
            tuple((
                mailbox,
                many0(preceded(
                    char(','),
                    alt((map(mailbox, Some), map(opt(cfws), |_| None))),
                )),
            )),
        )),
    )(input)?;

    let mut result = vec![];
    for (first, rest) in entries {
        result.push(first);
        result.extend(rest.into_iter().flatten());
    }
    Ok((loc, MailboxList(result)))
}

// group_list = { mailbox_list | cfws | obs_group_list }
fn group_list(input: Span) -> IResult<Span, MailboxList> {
    context(
        "group_list",
        alt((
            mailbox_list,
            map(
                terminated(many1(preceded(opt(cfws), char(','))), opt(cfws)),
                |_| MailboxList(vec![]),
            ),
            map(cfws, |_| MailboxList(vec![])),
        )),
    )(input)
}

// group = { display_name ~ ":" ~ group_list? ~ ";" ~ cfws? }
fn group(input: Span) -> IResult<Span, Address> {
    let (loc, (name, _, entries, _)) = context(
        "group",
        terminated(
            tuple((display_name, char(':'), opt(group_list), char(';'))),
            opt(cfws),
        ),
    )(input)?;
    Ok((
        loc,
        Address::Group {
            name,
            entries: entries.unwrap_or_else(|| MailboxList(vec![])),
        },
    ))
}

// address = { mailbox | group }
fn address(input: Span) -> IResult<Span, Address> {
    context("address", alt((map(mailbox, Address::Mailbox), group)))(input)
}

// obs_addr_list = {  ((cfws? ~ ",")* ~ address ~ ("," ~ (address | cfws))*)+ }
fn address_list(input: Span) -> IResult<Span, AddressList> {
    let (loc, entries) = context(
        "address_list",
        many1(preceded(
            many0(preceded(opt(cfws), char(','))),
            tuple((
                address,
                many0(preceded(
                    char(','),
                    alt((map(address, Some), map(opt(cfws), |_| None))),
                )),
            )),
        )),
    )(input)?;

    let mut result = vec![];
    for (first, rest) in entries {
        result.push(first);
        result.extend(rest.into_iter().flatten());
    }
    Ok((loc, AddressList(result)))
}

// path = { angle_addr | (cfws? ~ "<" ~ cfws? ~ ">" ~ cfws?) }
fn return_path(input: Span) -> IResult<Span, Option<AddrSpec>> {
    context(
        "return_path",
        alt((
            map(angle_addr, Some),
            map(
                tuple((opt(cfws), char('<'), opt(cfws), char('>'), opt(cfws))),
                |_| None,
            ),
            map(addr_spec, Some),
        )),
    )(input)
}

// no_fold_literal = { "[" ~ dtext* ~ "]" }
fn no_fold_literal(input: Span) -> IResult<Span, String> {
    context(
        "no_fold_literal",
        map(
            recognize(tuple((tag("["), take_while(is_dtext), tag("]")))),
            |s: Span| s.to_string(),
        ),
    )(input)
}

// id_left = { dot_atom_text | obs_id_left }
fn id_left(input: Span) -> IResult<Span, String> {
    context("id_left", alt((dot_atom_text, local_part)))(input)
}

// id_right = { dot_atom_text | no_fold_literal | obs_id_right }
fn id_right(input: Span) -> IResult<Span, String> {
    context("id_right", alt((dot_atom_text, no_fold_literal, domain)))(input)
}

// msg_id = { cfws? ~ "<" ~ id_left ~ "@" ~ id_right ~ ">" ~ cfws? }
fn msg_id(input: Span) -> IResult<Span, MessageID> {
    let (loc, (left, _, right)) = context(
        "msg_id",
        delimited(
            preceded(opt(cfws), char('<')),
            tuple((id_left, char('@'), id_right)),
            preceded(char('>'), opt(cfws)),
        ),
    )(input)?;

    Ok((loc, MessageID(format!("{left}@{right}"))))
}

// Some senders separate the ids in References with commas
fn msg_id_list(input: Span) -> IResult<Span, Vec<MessageID>> {
    context(
        "msg_id_list",
        many1(terminated(msg_id, opt(preceded(char(','), opt(cfws))))),
    )(input)
}

/// Content-ID is frequently emitted without an `@`
fn content_id(input: Span) -> IResult<Span, MessageID> {
    context(
        "content_id",
        alt((
            msg_id,
            map(
                delimited(
                    preceded(opt(cfws), char('<')),
                    id_right,
                    preceded(char('>'), opt(cfws)),
                ),
                MessageID,
            ),
        )),
    )(input)
}

// keywords = { phrase ~ ("," ~ phrase)* }
fn keywords(input: Span) -> IResult<Span, Vec<String>> {
    context("keywords", separated_list1(char(','), phrase))(input)
}

// version = { cfws? ~ digit+ ~ cfws? ~ "." ~ cfws? ~ digit+ ~ cfws? }
fn mime_version(input: Span) -> IResult<Span, (u32, u32)> {
    context(
        "mime_version",
        map(
            tuple((
                opt(cfws),
                nom::character::complete::u32,
                opt(cfws),
                char('.'),
                opt(cfws),
                nom::character::complete::u32,
                opt(cfws),
            )),
            |(_, major, _, _, _, minor, _)| (major, minor),
        ),
    )(input)
}

// mime_token = { (!(" " | ctl | tspecials) ~ char)+ }
fn mime_token(input: Span) -> IResult<Span, Span> {
    context("mime_token", take_while1(is_mime_token))(input)
}

fn parameters(input: Span) -> IResult<Span, Vec<MimeParameter>> {
    many0(preceded(
        // RFC 2231 shows examples without `;` between parameters and
        // some implementations copied that, so the separator is optional
        preceded(opt(char(';')), opt(cfws)),
        terminated(parameter, opt(cfws)),
    ))(input)
}

// content_type = { cfws? ~ type ~ cfws? ~ "/" ~ cfws? ~ subtype ~
//  cfws? ~ (";"? ~ cfws? ~ parameter ~ cfws?)* ~ ";"? }
fn content_type(input: Span) -> IResult<Span, MimeParameters> {
    let (loc, (mime_type, _, _, _, mime_subtype, _, parameters, _)) = context(
        "content_type",
        preceded(
            opt(cfws),
            tuple((
                mime_token,
                opt(cfws),
                char('/'),
                opt(cfws),
                mime_token,
                opt(cfws),
                parameters,
                opt(terminated(char(';'), opt(cfws))),
            )),
        ),
    )(input)?;

    Ok((
        loc,
        MimeParameters {
            value: format!("{mime_type}/{mime_subtype}"),
            parameters,
        },
    ))
}

// disposition = { cfws? ~ disposition_type ~ cfws? ~ (";"? ~ cfws? ~ parameter ~ cfws?)* ~ ";"? }
fn content_disposition(input: Span) -> IResult<Span, MimeParameters> {
    let (loc, (value, _, parameters, _)) = context(
        "content_disposition",
        preceded(
            opt(cfws),
            tuple((
                mime_token,
                opt(cfws),
                parameters,
                opt(terminated(char(';'), opt(cfws))),
            )),
        ),
    )(input)?;

    Ok((
        loc,
        MimeParameters {
            value: value.to_string(),
            parameters,
        },
    ))
}

fn content_transfer_encoding(input: Span) -> IResult<Span, String> {
    context(
        "content_transfer_encoding",
        map(delimited(opt(cfws), mime_token, opt(cfws)), |s: Span| {
            s.to_ascii_lowercase()
        }),
    )(input)
}

// parameter = { regular_parameter | extended_parameter }
fn parameter(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "parameter",
        alt((
            regular_parameter,
            extended_param_with_charset,
            extended_param_no_charset,
        )),
    )(input)
}

fn ext_value(input: Span) -> IResult<Span, String> {
    map(
        recognize(many0(alt((ext_octet, take_while1(is_attribute_char))))),
        |s: Span| s.to_string(),
    )(input)
}

fn extended_param_with_charset(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "extended_param_with_charset",
        map(
            tuple((
                attribute,
                opt(section),
                char('*'),
                opt(cfws),
                char('='),
                opt(cfws),
                opt(mime_charset),
                char('\''),
                opt(mime_charset),
                char('\''),
                ext_value,
            )),
            |(name, section, _, _, _, _, mime_charset, _, mime_language, _, value)| {
                MimeParameter {
                    name: name.to_string(),
                    section,
                    mime_charset: mime_charset.map(|s| s.to_string()),
                    mime_language: mime_language.map(|s| s.to_string()),
                    uses_encoding: true,
                    value,
                }
            },
        ),
    )(input)
}

fn extended_param_no_charset(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "extended_param_no_charset",
        map(
            tuple((
                attribute,
                opt(section),
                opt(char('*')),
                opt(cfws),
                char('='),
                opt(cfws),
                alt((quoted_string, ext_value)),
            )),
            |(name, section, star, _, _, _, value)| MimeParameter {
                name: name.to_string(),
                section,
                mime_charset: None,
                mime_language: None,
                uses_encoding: star.is_some(),
                value,
            },
        ),
    )(input)
}

fn mime_charset(input: Span) -> IResult<Span, Span> {
    context(
        "mime_charset",
        take_while1(|c| is_mime_token(c) && c != '\''),
    )(input)
}

fn ext_octet(input: Span) -> IResult<Span, Span> {
    context(
        "ext_octet",
        recognize(tuple((
            char('%'),
            satisfy(|c| c.is_ascii_hexdigit()),
            satisfy(|c| c.is_ascii_hexdigit()),
        ))),
    )(input)
}

// section = { "*" ~ ASCII_DIGIT+ }
fn section(input: Span) -> IResult<Span, u32> {
    context(
        "section",
        preceded(char('*'), nom::character::complete::u32),
    )(input)
}

// regular_parameter = { attribute ~ cfws? ~ "=" ~ cfws? ~ value }
fn regular_parameter(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "regular_parameter",
        map(
            tuple((attribute, opt(cfws), char('='), opt(cfws), value)),
            |(name, _, _, _, value)| MimeParameter {
                name: name.to_string(),
                value,
                section: None,
                uses_encoding: false,
                mime_charset: None,
                mime_language: None,
            },
        ),
    )(input)
}

// attribute = { attribute_char+ }
fn attribute(input: Span) -> IResult<Span, Span> {
    context("attribute", take_while1(is_attribute_char))(input)
}

fn value(input: Span) -> IResult<Span, String> {
    context(
        "value",
        alt((map(mime_token, |s: Span| s.to_string()), quoted_string)),
    )(input)
}

fn parse_with<'a, R, F>(text: &'a str, element: &'static str, parser: F) -> Result<R>
where
    F: Fn(Span<'a>) -> IResult<Span<'a>, R>,
{
    let input = make_span(text);
    let (_, result) =
        all_consuming(parser)(input).map_err(|err| to_field_error(input, element, err))?;
    Ok(result)
}

/// Strip a trailing `(comment)`, eg: the zone name that many
/// agents append to a date
fn strip_trailing_comment(text: &str) -> &str {
    let text = text.trim();
    if text.ends_with(')') {
        if let Some(open) = text.rfind('(') {
            return text[..open].trim_end();
        }
    }
    text
}

pub struct Parser;

impl Parser {
    pub fn parse_mailbox_list_header(text: &str) -> Result<MailboxList> {
        parse_with(text, "mailbox_list", mailbox_list)
    }

    pub fn parse_mailbox_header(text: &str) -> Result<Mailbox> {
        parse_with(text, "mailbox", mailbox)
    }

    /// An empty value is an empty list, as produced by tools that
    /// strip all recipients
    pub fn parse_address_list_header(text: &str) -> Result<AddressList> {
        if text.trim().is_empty() {
            return Ok(AddressList(vec![]));
        }
        parse_with(text, "address_list", address_list)
    }

    pub fn parse_return_path_header(text: &str) -> Result<Option<AddrSpec>> {
        parse_with(text, "return_path", return_path)
    }

    pub fn parse_msg_id_header(text: &str) -> Result<MessageID> {
        parse_with(text, "msg_id", msg_id)
    }

    pub fn parse_msg_id_header_list(text: &str) -> Result<Vec<MessageID>> {
        parse_with(text, "msg_id_list", msg_id_list)
    }

    pub fn parse_content_id_header(text: &str) -> Result<MessageID> {
        parse_with(text, "content_id", content_id)
    }

    pub fn parse_keywords_header(text: &str) -> Result<Vec<String>> {
        parse_with(text, "keywords", keywords)
    }

    pub fn parse_mime_version_header(text: &str) -> Result<(u32, u32)> {
        parse_with(text, "mime_version", mime_version)
    }

    pub fn parse_content_type_header(text: &str) -> Result<MimeParameters> {
        parse_with(text, "content_type", content_type)
    }

    pub fn parse_content_disposition_header(text: &str) -> Result<MimeParameters> {
        parse_with(text, "content_disposition", content_disposition)
    }

    pub fn parse_content_transfer_encoding_header(text: &str) -> Result<String> {
        parse_with(
            text,
            "content_transfer_encoding",
            content_transfer_encoding,
        )
    }

    pub fn parse_date_header(text: &str) -> Result<DateTime<FixedOffset>> {
        let trimmed = strip_trailing_comment(text);
        DateTime::parse_from_rfc2822(trimmed)
            .map_err(|err| FieldParseError::new("date_time", text, format!("{err:#}")))
    }

    /// `received = tokens ";" date-time`. The date follows the
    /// last semicolon.
    pub fn parse_received_header(text: &str) -> Result<(String, DateTime<FixedOffset>)> {
        let semi = text.rfind(';').ok_or_else(|| {
            FieldParseError::new("received", text, "expected ';' before the date-time")
        })?;
        let info = text[..semi].trim().to_string();
        // Trace fields have no encoded form for 8-bit text
        if !info.is_ascii() {
            return Err(FieldParseError::new(
                "received",
                text,
                "received tokens must be US-ASCII",
            ));
        }
        let date = Self::parse_date_header(&text[semi + 1..])
            .map_err(|err| FieldParseError::new("received", text, err.reason))?;
        Ok((info, date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrSpec {
    pub local_part: String,
    pub domain: String,
}

impl AddrSpec {
    pub fn new(local_part: &str, domain: &str) -> Self {
        Self {
            local_part: local_part.to_string(),
            domain: domain.to_string(),
        }
    }

    pub fn parse(email: &str) -> Result<Self> {
        parse_with(email, "addr_spec", addr_spec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: AddrSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxList(pub Vec<Mailbox>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Mailbox(Mailbox),
    Group { name: String, entries: MailboxList },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressList(pub Vec<Address>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageID(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
struct MimeParameter {
    name: String,
    section: Option<u32>,
    mime_charset: Option<String>,
    mime_language: Option<String>,
    uses_encoding: bool,
    value: String,
}

/// The value and parameters of a Content-Type or
/// Content-Disposition header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeParameters {
    pub value: String,
    parameters: Vec<MimeParameter>,
}

fn decode_pending(charset: Option<&Charset>, pending: &mut Vec<u8>, result: &mut String) {
    if pending.is_empty() {
        return;
    }
    match charset {
        Some(charset) => result.push_str(&charset.decode_without_bom_handling(pending).0),
        None => result.push_str(&String::from_utf8_lossy(pending)),
    }
    pending.clear();
}

impl MimeParameters {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            parameters: vec![],
        }
    }

    /// Build from a base value and a set of plain parameter values
    pub fn from_parts(value: &str, parameters: &BTreeMap<String, String>) -> Self {
        let mut result = Self::new(value);
        for (name, value) in parameters {
            result.set(name, value);
        }
        result
    }

    /// Retrieve the value for a named parameter.
    /// RFC 2231 sections are joined, %-encoded values are decoded
    /// using their declared charset and RFC 2047 encoded words in
    /// plain values are decoded.
    /// Unknown charsets fall back to UTF-8.
    pub fn get(&self, name: &str) -> Option<String> {
        let mut elements: Vec<&MimeParameter> = self
            .parameters
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .collect();
        if elements.is_empty() {
            return None;
        }
        elements.sort_by_key(|p| p.section);

        let charset = elements
            .iter()
            .find_map(|p| p.mime_charset.as_deref())
            .and_then(|label| Charset::for_label_no_replacement(label.as_bytes()));

        let mut result = String::new();
        let mut pending: Vec<u8> = vec![];
        for ele in elements {
            if ele.uses_encoding {
                pending.extend(percent_decode_str(&ele.value));
            } else {
                decode_pending(charset.as_ref(), &mut pending, &mut result);
                result.push_str(&rfc2047::decode(&ele.value));
            }
        }
        decode_pending(charset.as_ref(), &mut pending, &mut result);

        Some(result)
    }

    /// Remove the named parameter
    pub fn remove(&mut self, name: &str) {
        self.parameters
            .retain(|p| !p.name.eq_ignore_ascii_case(name));
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);

        self.parameters.push(MimeParameter {
            name: name.to_string(),
            value: value.to_string(),
            section: None,
            mime_charset: None,
            mime_language: None,
            uses_encoding: false,
        });
    }

    /// Parameter names, in the order that they first appear
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![];
        for p in &self.parameters {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&p.name)) {
                names.push(&p.name);
            }
        }
        names
    }
}

/// Quote input string `s` if it cannot be emitted as a sequence
/// of atoms, using a backslash escape for `"` and `\`
pub(crate) fn quote_phrase(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || s.contains("=?")
        || s.starts_with(' ')
        || s.ends_with(' ')
        || s.contains("  ")
        || !s.chars().all(|c| c == ' ' || is_atext(c));
    if !needs_quoting {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len() + 4);
    result.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            result.push('\\');
        }
        result.push(c);
    }
    result.push('"');
    result
}

/// A display name or keyword: quoted as needed when ASCII,
/// otherwise emitted as encoded words
pub(crate) fn encode_phrase(s: &str, charset: &str) -> String {
    if s.is_ascii() {
        quote_phrase(s)
    } else {
        rfc2047::encode(s, charset).into_owned()
    }
}

impl EncodeHeaderValue for AddrSpec {
    fn encode_value(&self, _options: &FieldOptions) -> String {
        let mut result = String::new();

        let needs_quoting = !self.local_part.chars().all(|c| is_atext(c) || c == '.')
            || self.local_part.split('.').any(|atom| atom.is_empty());
        if needs_quoting {
            result.push('"');
            for c in self.local_part.chars() {
                if c == '"' || c == '\\' {
                    result.push('\\');
                }
                result.push(c);
            }
            result.push('"');
        } else {
            result.push_str(&self.local_part);
        }
        result.push('@');
        result.push_str(&self.domain);

        result
    }
}

impl EncodeHeaderValue for Mailbox {
    fn encode_value(&self, options: &FieldOptions) -> String {
        match &self.name {
            Some(name) => format!(
                "{} <{}>",
                encode_phrase(name, &options.charset),
                self.address.encode_value(options)
            ),
            None => self.address.encode_value(options),
        }
    }
}

impl EncodeHeaderValue for MailboxList {
    fn encode_value(&self, options: &FieldOptions) -> String {
        self.0
            .iter()
            .map(|mailbox| mailbox.encode_value(options))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl EncodeHeaderValue for Address {
    fn encode_value(&self, options: &FieldOptions) -> String {
        match self {
            Self::Mailbox(mbox) => mbox.encode_value(options),
            Self::Group { name, entries } => {
                let mut result = encode_phrase(name, &options.charset);
                result.push(':');
                if !entries.0.is_empty() {
                    result.push(' ');
                    result.push_str(&entries.encode_value(options));
                }
                result.push(';');
                result
            }
        }
    }
}

impl EncodeHeaderValue for AddressList {
    fn encode_value(&self, options: &FieldOptions) -> String {
        self.0
            .iter()
            .map(|address| address.encode_value(options))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl EncodeHeaderValue for MessageID {
    fn encode_value(&self, _options: &FieldOptions) -> String {
        format!("<{}>", self.0)
    }
}

impl EncodeHeaderValue for Vec<MessageID> {
    fn encode_value(&self, options: &FieldOptions) -> String {
        self.iter()
            .map(|id| id.encode_value(options))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl EncodeHeaderValue for MimeParameters {
    fn encode_value(&self, options: &FieldOptions) -> String {
        let mut result = self.value.clone();
        for name in self.names() {
            let Some(value) = self.get(name) else {
                continue;
            };
            let param =
                rfc2047::param_encode(&value, &options.charset, &options.parameter_language);
            result.push_str("; ");
            result.push_str(&param.to_parameter(name));
        }
        result
    }
}
