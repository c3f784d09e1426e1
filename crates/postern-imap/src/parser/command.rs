//! Command grammar.
//!
//! Parses one complete command, as framed by the decoder, into a
//! [`Command`]. Commands this server does not know are returned as
//! [`CommandBody::Unknown`] without inspecting their arguments.

use bytes::Bytes;

use super::ParseError;
use super::lexer::Lexer;
use crate::command::{Command, CommandBody, FetchAttribute, FetchItems, SearchCriteria, Section};
use crate::types::{Flag, Flags, Mailbox};

/// Nesting bound for parenthesized and NOT/OR search keys.
const MAX_SEARCH_DEPTH: usize = 32;

/// Parses a complete command including its trailing CRLF.
pub fn parse_command(input: &[u8]) -> Result<Command, ParseError> {
    let mut lx = Lexer::new(input);
    let tag = lx.read_tag()?;
    lx.expect_space()?;
    let name = lx.read_atom()?.to_ascii_uppercase();

    let body = match name.as_str() {
        "CAPABILITY" => CommandBody::Capability,
        "NOOP" => CommandBody::Noop,
        "LOGOUT" => CommandBody::Logout,
        "STARTTLS" => CommandBody::StartTls,
        "CHECK" => CommandBody::Check,
        "CLOSE" => CommandBody::Close,
        "UNSELECT" => CommandBody::Unselect,
        "IDLE" => CommandBody::Idle,
        "LOGIN" => {
            lx.expect_space()?;
            let username = lx.read_astring_utf8()?;
            lx.expect_space()?;
            let password = lx.read_astring_utf8()?;
            CommandBody::Login { username, password }
        }
        "AUTHENTICATE" => {
            lx.expect_space()?;
            let mechanism = lx.read_atom()?.to_ascii_uppercase();
            let initial_response = if lx.eat(b' ') {
                Some(lx.read_atom()?.to_string())
            } else {
                None
            };
            CommandBody::Authenticate {
                mechanism,
                initial_response,
            }
        }
        "SELECT" | "EXAMINE" => {
            lx.expect_space()?;
            let mailbox = Mailbox::new(lx.read_astring_utf8()?);
            if name == "SELECT" {
                CommandBody::Select { mailbox }
            } else {
                CommandBody::Examine { mailbox }
            }
        }
        "LIST" => {
            lx.expect_space()?;
            let reference = lx.read_astring_utf8()?;
            lx.expect_space()?;
            let pattern = lx.read_list_mailbox()?;
            CommandBody::List { reference, pattern }
        }
        "APPEND" => parse_append(&mut lx)?,
        "COMPRESS" => {
            lx.expect_space()?;
            CommandBody::Compress {
                mechanism: lx.read_atom()?.to_ascii_uppercase(),
            }
        }
        "FETCH" => parse_fetch(&mut lx, false)?,
        "SEARCH" => parse_search(&mut lx, false)?,
        "UID" => {
            lx.expect_space()?;
            match lx.read_atom()?.to_ascii_uppercase().as_str() {
                "FETCH" => parse_fetch(&mut lx, true)?,
                "SEARCH" => parse_search(&mut lx, true)?,
                _ => return Err(lx.error("FETCH or SEARCH after UID")),
            }
        }
        _ => {
            return Ok(Command {
                tag,
                body: CommandBody::Unknown { name },
            });
        }
    };

    lx.expect_crlf()?;
    Ok(Command { tag, body })
}

fn parse_append(lx: &mut Lexer<'_>) -> Result<CommandBody, ParseError> {
    lx.expect_space()?;
    let mailbox = Mailbox::new(lx.read_astring_utf8()?);
    lx.expect_space()?;

    let mut flags = Flags::new();
    if lx.eat(b'(') {
        if !lx.eat(b')') {
            loop {
                flags.insert(Flag::parse(&lx.read_flag()?));
                if lx.eat(b')') {
                    break;
                }
                lx.expect_space()?;
            }
        }
        lx.expect_space()?;
    }

    let mut date = None;
    if lx.peek() == Some(b'"') {
        let raw = lx.read_quoted()?;
        date = Some(String::from_utf8(raw).map_err(|_| lx.error("date-time"))?);
        lx.expect_space()?;
    }

    let message = Bytes::copy_from_slice(lx.read_literal()?);
    Ok(CommandBody::Append {
        mailbox,
        flags,
        date,
        message,
    })
}

fn parse_fetch(lx: &mut Lexer<'_>, uid: bool) -> Result<CommandBody, ParseError> {
    lx.expect_space()?;
    let sequence_set = lx.read_sequence_set()?;
    lx.expect_space()?;

    let items = if lx.eat(b'(') {
        let mut attrs = Vec::new();
        loop {
            let keyword = lx.read_keyword()?.to_ascii_uppercase();
            attrs.push(parse_fetch_att(lx, &keyword)?);
            if lx.eat(b')') {
                break;
            }
            lx.expect_space()?;
        }
        FetchItems::Items(attrs)
    } else {
        let keyword = lx.read_keyword()?.to_ascii_uppercase();
        match keyword.as_str() {
            "ALL" => FetchItems::All,
            "FAST" => FetchItems::Fast,
            _ => FetchItems::Items(vec![parse_fetch_att(lx, &keyword)?]),
        }
    };

    Ok(CommandBody::Fetch {
        sequence_set,
        items,
        uid,
    })
}

fn parse_fetch_att(lx: &mut Lexer<'_>, keyword: &str) -> Result<FetchAttribute, ParseError> {
    Ok(match keyword {
        "FLAGS" => FetchAttribute::Flags,
        "INTERNALDATE" => FetchAttribute::InternalDate,
        "RFC822.SIZE" => FetchAttribute::Rfc822Size,
        "ENVELOPE" => FetchAttribute::Envelope,
        "UID" => FetchAttribute::Uid,
        "RFC822" => FetchAttribute::Rfc822,
        "RFC822.HEADER" => FetchAttribute::Rfc822Header,
        "RFC822.TEXT" => FetchAttribute::Rfc822Text,
        "BODY" | "BODY.PEEK" => {
            let section = parse_section(lx)?;
            let partial = if lx.eat(b'<') {
                let origin = lx.read_number()?;
                lx.expect(b'.', "'.'")?;
                let length = lx.read_number()?;
                if length == 0 {
                    return Err(lx.error("non-zero partial length"));
                }
                lx.expect(b'>', "'>'")?;
                Some((origin, length))
            } else {
                None
            };
            FetchAttribute::Body {
                section,
                peek: keyword == "BODY.PEEK",
                partial,
            }
        }
        _ => return Err(lx.error("fetch attribute")),
    })
}

fn parse_section(lx: &mut Lexer<'_>) -> Result<Section, ParseError> {
    lx.expect(b'[', "'['")?;
    if lx.eat(b']') {
        return Ok(Section::Full);
    }
    let keyword = lx.read_keyword()?.to_ascii_uppercase();
    let section = match keyword.as_str() {
        "HEADER" => Section::Header,
        "TEXT" => Section::Text,
        "HEADER.FIELDS" => Section::HeaderFields(parse_header_list(lx)?),
        "HEADER.FIELDS.NOT" => Section::HeaderFieldsNot(parse_header_list(lx)?),
        _ => return Err(lx.error("section")),
    };
    lx.expect(b']', "']'")?;
    Ok(section)
}

fn parse_header_list(lx: &mut Lexer<'_>) -> Result<Vec<String>, ParseError> {
    lx.expect_space()?;
    lx.expect(b'(', "'('")?;
    let mut fields = Vec::new();
    loop {
        fields.push(lx.read_astring_utf8()?.to_ascii_uppercase());
        if lx.eat(b')') {
            return Ok(fields);
        }
        lx.expect_space()?;
    }
}

fn parse_search(lx: &mut Lexer<'_>, uid: bool) -> Result<CommandBody, ParseError> {
    lx.expect_space()?;
    let mut keys = Vec::new();
    loop {
        keys.push(parse_search_key(lx, 0)?);
        if lx.at_crlf() {
            break;
        }
        lx.expect_space()?;
    }
    let criteria = if keys.len() == 1 {
        keys.remove(0)
    } else {
        SearchCriteria::And(keys)
    };
    Ok(CommandBody::Search { criteria, uid })
}

fn parse_search_key(lx: &mut Lexer<'_>, depth: usize) -> Result<SearchCriteria, ParseError> {
    if depth > MAX_SEARCH_DEPTH {
        return Err(lx.error("shallower search nesting"));
    }
    if lx.eat(b'(') {
        let mut keys = Vec::new();
        loop {
            keys.push(parse_search_key(lx, depth + 1)?);
            if lx.eat(b')') {
                return Ok(SearchCriteria::And(keys));
            }
            lx.expect_space()?;
        }
    }
    if matches!(lx.peek(), Some(b'0'..=b'9' | b'*')) {
        return lx.read_sequence_set().map(SearchCriteria::SequenceSet);
    }

    let keyword = lx.read_atom()?.to_ascii_uppercase();
    Ok(match keyword.as_str() {
        "ALL" => SearchCriteria::All,
        "ANSWERED" => SearchCriteria::Answered,
        "UNANSWERED" => SearchCriteria::Unanswered,
        "DELETED" => SearchCriteria::Deleted,
        "UNDELETED" => SearchCriteria::Undeleted,
        "DRAFT" => SearchCriteria::Draft,
        "FLAGGED" => SearchCriteria::Flagged,
        "UNFLAGGED" => SearchCriteria::Unflagged,
        "NEW" => SearchCriteria::New,
        "SEEN" => SearchCriteria::Seen,
        "UNSEEN" => SearchCriteria::Unseen,
        "SUBJECT" | "FROM" | "TO" | "CC" | "BCC" | "BODY" | "TEXT" => {
            lx.expect_space()?;
            let value = lx.read_astring_utf8()?;
            match keyword.as_str() {
                "SUBJECT" => SearchCriteria::Subject(value),
                "FROM" => SearchCriteria::From(value),
                "TO" => SearchCriteria::To(value),
                "CC" => SearchCriteria::Cc(value),
                "BCC" => SearchCriteria::Bcc(value),
                "BODY" => SearchCriteria::Body(value),
                _ => SearchCriteria::Text(value),
            }
        }
        "SINCE" | "BEFORE" | "ON" => {
            lx.expect_space()?;
            let date = lx.read_astring_utf8()?;
            match keyword.as_str() {
                "SINCE" => SearchCriteria::Since(date),
                "BEFORE" => SearchCriteria::Before(date),
                _ => SearchCriteria::On(date),
            }
        }
        "LARGER" | "SMALLER" => {
            lx.expect_space()?;
            let size = lx.read_number()?;
            if keyword == "LARGER" {
                SearchCriteria::Larger(size)
            } else {
                SearchCriteria::Smaller(size)
            }
        }
        "HEADER" => {
            lx.expect_space()?;
            let field = lx.read_astring_utf8()?;
            lx.expect_space()?;
            let value = lx.read_astring_utf8()?;
            SearchCriteria::Header(field, value)
        }
        "UID" => {
            lx.expect_space()?;
            SearchCriteria::UidSet(lx.read_sequence_set()?)
        }
        "NOT" => {
            lx.expect_space()?;
            SearchCriteria::Not(Box::new(parse_search_key(lx, depth + 1)?))
        }
        "OR" => {
            lx.expect_space()?;
            let left = parse_search_key(lx, depth + 1)?;
            lx.expect_space()?;
            let right = parse_search_key(lx, depth + 1)?;
            SearchCriteria::Or(Box::new(left), Box::new(right))
        }
        _ => return Err(lx.error("search key")),
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::types::SequenceSet;

    fn body(input: &[u8]) -> CommandBody {
        parse_command(input).unwrap().body
    }

    #[test]
    fn simple_commands() {
        let cmd = parse_command(b"a1 capability\r\n").unwrap();
        assert_eq!(cmd.tag.as_str(), "a1");
        assert_eq!(cmd.body, CommandBody::Capability);
        assert_eq!(body(b"a2 NOOP\r\n"), CommandBody::Noop);
        assert_eq!(body(b"a3 LOGOUT\r\n"), CommandBody::Logout);
        assert_eq!(body(b"a4 STARTTLS\r\n"), CommandBody::StartTls);
        assert_eq!(body(b"a5 IDLE\r\n"), CommandBody::Idle);
    }

    #[test]
    fn login_with_quoted_and_literal() {
        assert_eq!(
            body(b"a LOGIN \"joe user\" {6}\r\nse cr\"\r\n"),
            CommandBody::Login {
                username: "joe user".into(),
                password: "se cr\"".into(),
            }
        );
    }

    #[test]
    fn authenticate_with_initial_response() {
        assert_eq!(
            body(b"a AUTHENTICATE plain AGpvZQBzZWNyZXQ=\r\n"),
            CommandBody::Authenticate {
                mechanism: "PLAIN".into(),
                initial_response: Some("AGpvZQBzZWNyZXQ=".into()),
            }
        );
    }

    #[test]
    fn select_normalizes_inbox() {
        assert_eq!(
            body(b"a SELECT inbox\r\n"),
            CommandBody::Select {
                mailbox: Mailbox::inbox()
            }
        );
    }

    #[test]
    fn list_with_empty_reference() {
        assert_eq!(
            body(b"a LIST \"\" %\r\n"),
            CommandBody::List {
                reference: String::new(),
                pattern: "%".into(),
            }
        );
    }

    #[test]
    fn append_with_flags_and_date() {
        let parsed = body(
            b"a APPEND Drafts (\\Seen \\Draft) \"05-Jan-2024 10:00:00 +0000\" {12}\r\n\
              Hello\r\nWorld\r\n",
        );
        let CommandBody::Append {
            mailbox,
            flags,
            date,
            message,
        } = parsed
        else {
            panic!("expected APPEND");
        };
        assert_eq!(mailbox.as_str(), "Drafts");
        assert!(flags.is_seen());
        assert!(flags.contains(&Flag::Draft));
        assert_eq!(date.as_deref(), Some("05-Jan-2024 10:00:00 +0000"));
        assert_eq!(&message[..], b"Hello\r\nWorld");
    }

    #[test]
    fn fetch_macro_and_list() {
        assert_eq!(
            body(b"a FETCH 1:500 FAST\r\n"),
            CommandBody::Fetch {
                sequence_set: SequenceSet::range(1, 500).unwrap(),
                items: FetchItems::Fast,
                uid: false,
            }
        );
        let CommandBody::Fetch { items, uid, .. } =
            body(b"a UID FETCH 1:* (FLAGS BODY.PEEK[HEADER.FIELDS (From Subject)]<0.512>)\r\n")
        else {
            panic!("expected FETCH");
        };
        assert!(uid);
        assert_eq!(
            items,
            FetchItems::Items(vec![
                FetchAttribute::Flags,
                FetchAttribute::Body {
                    section: Section::HeaderFields(vec!["FROM".into(), "SUBJECT".into()]),
                    peek: true,
                    partial: Some((0, 512)),
                },
            ])
        );
    }

    #[test]
    fn fetch_rejects_bodystructure_form() {
        let err = parse_command(b"a FETCH 1 BODY\r\n").unwrap_err();
        assert_eq!(err.tag.unwrap().as_str(), "a");
        assert_eq!(err.expected, "'['");
    }

    #[test]
    fn search_keys() {
        assert_eq!(
            body(b"a SEARCH UNSEEN FROM \"alice\"\r\n"),
            CommandBody::Search {
                criteria: SearchCriteria::And(vec![
                    SearchCriteria::Unseen,
                    SearchCriteria::From("alice".into()),
                ]),
                uid: false,
            }
        );
        assert_eq!(
            body(b"a UID SEARCH OR SEEN (LARGER 10 NOT DELETED)\r\n"),
            CommandBody::Search {
                criteria: SearchCriteria::Or(
                    Box::new(SearchCriteria::Seen),
                    Box::new(SearchCriteria::And(vec![
                        SearchCriteria::Larger(10),
                        SearchCriteria::Not(Box::new(SearchCriteria::Deleted)),
                    ])),
                ),
                uid: true,
            }
        );
    }

    #[test]
    fn search_nesting_is_bounded() {
        let mut input = b"a SEARCH ".to_vec();
        input.extend(std::iter::repeat_n(b'(', 64));
        input.extend_from_slice(b"ALL");
        input.extend(std::iter::repeat_n(b')', 64));
        input.extend_from_slice(b"\r\n");
        assert!(parse_command(&input).is_err());
    }

    #[test]
    fn unknown_command_keeps_tag() {
        let cmd = parse_command(b"x9 XYZZY foo bar\r\n").unwrap();
        assert_eq!(cmd.tag.as_str(), "x9");
        assert_eq!(
            cmd.body,
            CommandBody::Unknown {
                name: "XYZZY".into()
            }
        );
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let err = parse_command(b"a NOOP extra\r\n").unwrap_err();
        assert_eq!(err.expected, "CRLF");
        assert_eq!(err.position, 6);
    }

    #[test]
    fn missing_tag() {
        let err = parse_command(b" NOOP\r\n").unwrap_err();
        assert!(err.tag.is_none());
    }
}
