//! The seed token grammar: a flat, dot-separated encoding of the recursive
//! generation trace, and the decoder that rebuilds a graph from it.
//!
//! A seed is the pre-order flattening of the recursion: every task and every
//! gateway pair appears as exactly one token, in creation order. The seed
//! alone determines the full graph, so decoding consults no random source.
//! Sequential composition has no token of its own; it is represented by
//! concatenation, and the decoder links any tokens left over after a
//! construct as a sequential continuation.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::bpmn::{Bpmn, GatewayDirection};
use crate::error::{Error, Result};

use super::{gateway_node, task_node, PROCESS_ID};

/// The separator between tokens in a seed string.
pub const TOKEN_SEPARATOR: char = '.';

/// The gateway kind of a branch construct, written as the token's leading
/// character: `x` for exclusive, `p` for parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    Exclusive,
    Parallel,
}

impl GateKind {
    fn leading_char(self) -> char {
        match self {
            GateKind::Exclusive => 'x',
            GateKind::Parallel => 'p',
        }
    }
}

/// One element of a seed. The embedded lengths count *tokens*, not nodes:
/// a branch token `x2-1-..` is followed by exactly two tokens for its first
/// body and one for its second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedToken {
    /// `t-<id>`: a single task node.
    Task { id: String },
    /// `l<n>-<id1>-<id2>`: a loop whose diverging gateway flows straight
    /// back to the converging one; the body takes `n` tokens.
    EmptyLoop {
        body: usize,
        diverging: String,
        converging: String,
    },
    /// `l<n1>-<n2>-<id1>-<id2>`: a loop with a forward body (`n1` tokens)
    /// and a skip body (`n2` tokens).
    Loop {
        body: usize,
        skip: usize,
        diverging: String,
        converging: String,
    },
    /// `x<n1>-<n2>-<id1>-<id2>` / `p<n1>-<n2>-<id1>-<id2>`: a two-way
    /// exclusive or parallel branch.
    Branch {
        kind: GateKind,
        left: usize,
        right: usize,
        diverging: String,
        converging: String,
    },
}

impl SeedToken {
    /// The number of following tokens this construct claims for its bodies.
    fn sub_len(&self) -> usize {
        match self {
            SeedToken::Task { .. } => 0,
            SeedToken::EmptyLoop { body, .. } => *body,
            SeedToken::Loop { body, skip, .. } => body + skip,
            SeedToken::Branch { left, right, .. } => left + right,
        }
    }
}

/// Tokens are displayed in the exact textual form the grammar defines,
/// so `Display` and `FromStr` are inverses.
impl Display for SeedToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SeedToken::Task { id } => write!(f, "t-{id}"),
            SeedToken::EmptyLoop {
                body,
                diverging,
                converging,
            } => write!(f, "l{body}-{diverging}-{converging}"),
            SeedToken::Loop {
                body,
                skip,
                diverging,
                converging,
            } => write!(f, "l{body}-{skip}-{diverging}-{converging}"),
            SeedToken::Branch {
                kind,
                left,
                right,
                diverging,
                converging,
            } => write!(
                f,
                "{}{left}-{right}-{diverging}-{converging}",
                kind.leading_char()
            ),
        }
    }
}

/// Error for a single token that does not match the grammar.
/// The codec wraps this with the token's position in the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenParseError;

impl FromStr for SeedToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (lead, rest) = match s.chars().next() {
            Some(c) => (c, &s[c.len_utf8()..]),
            None => return Err(TokenParseError),
        };
        let segments: Vec<&str> = rest.split('-').collect();
        let number = |seg: &str| seg.parse::<usize>().map_err(|_| TokenParseError);
        let id = |seg: &str| {
            if seg.is_empty() || seg.contains(TOKEN_SEPARATOR) {
                Err(TokenParseError)
            } else {
                Ok(seg.to_string())
            }
        };
        match (lead, segments.as_slice()) {
            ('t', ["", task_id]) => Ok(SeedToken::Task { id: id(task_id)? }),
            ('l', [body, id1, id2]) => Ok(SeedToken::EmptyLoop {
                body: number(body)?,
                diverging: id(id1)?,
                converging: id(id2)?,
            }),
            ('l', [body, skip, id1, id2]) => Ok(SeedToken::Loop {
                body: number(body)?,
                skip: number(skip)?,
                diverging: id(id1)?,
                converging: id(id2)?,
            }),
            ('x' | 'p', [left, right, id1, id2]) => Ok(SeedToken::Branch {
                kind: if lead == 'x' {
                    GateKind::Exclusive
                } else {
                    GateKind::Parallel
                },
                left: number(left)?,
                right: number(right)?,
                diverging: id(id1)?,
                converging: id(id2)?,
            }),
            _ => Err(TokenParseError),
        }
    }
}

/// Join a token sequence into a seed string.
pub fn encode(tokens: &[SeedToken]) -> String {
    tokens
        .iter()
        .map(SeedToken::to_string)
        .collect::<Vec<_>>()
        .join(&TOKEN_SEPARATOR.to_string())
}

/// Split a seed string into tokens, reporting the first malformed token
/// together with its position.
pub fn parse_seed(seed: &str) -> Result<Vec<SeedToken>> {
    seed.split(TOKEN_SEPARATOR)
        .enumerate()
        .map(|(index, raw)| {
            raw.parse().map_err(|TokenParseError| Error::StructureMismatch {
                token: raw.to_string(),
                index,
            })
        })
        .collect()
}

/// Rebuild the SESE subgraph described by `tokens` inside `bpmn` and return
/// its head and tail node ids. `offset` is the absolute position of
/// `tokens[0]` in the full seed, used for error reporting.
///
/// The leading token's construct is materialized first; any tokens it does
/// not claim are decoded as a sequential continuation and linked tail to
/// head. The continuation walk iterates, so a flat task chain decodes in
/// constant stack space; only nested constructs recurse.
pub(crate) fn build(bpmn: &mut Bpmn, tokens: &[SeedToken], offset: usize) -> Result<(String, String)> {
    let (head, mut tail, mut consumed) = build_construct(bpmn, tokens, offset)?;
    while consumed < tokens.len() {
        let (next_head, next_tail, next_consumed) =
            build_construct(bpmn, &tokens[consumed..], offset + consumed)?;
        bpmn.add_flow(PROCESS_ID, &tail, &next_head);
        tail = next_tail;
        consumed += next_consumed;
    }
    Ok((head, tail))
}

/// Materialize exactly one construct (the leading token plus its declared
/// sub-seeds) and return its head, tail, and the number of tokens consumed.
fn build_construct(
    bpmn: &mut Bpmn,
    tokens: &[SeedToken],
    offset: usize,
) -> Result<(String, String, usize)> {
    let token = tokens.first().ok_or_else(|| Error::StructureMismatch {
        token: String::new(),
        index: offset,
    })?;
    let consumed = 1 + token.sub_len();
    // A construct claiming more tokens than the seed still holds is a
    // structural mismatch attributed to the claiming token.
    if consumed > tokens.len() {
        return Err(Error::StructureMismatch {
            token: token.to_string(),
            index: offset,
        });
    }

    match token {
        SeedToken::Task { id } => {
            let node = task_node(id);
            let node_id = node.id.clone();
            bpmn.add_node(node);
            Ok((node_id.clone(), node_id, consumed))
        }
        SeedToken::EmptyLoop {
            body,
            diverging,
            converging,
        } => {
            let (body_head, body_tail) = build(bpmn, &tokens[1..1 + body], offset + 1)?;
            let (div, conv) = add_loop_gateways(bpmn, diverging, converging);
            bpmn.add_flow(PROCESS_ID, &conv, &body_head);
            bpmn.add_flow(PROCESS_ID, &body_tail, &div);
            bpmn.add_flow(PROCESS_ID, &div, &conv);
            Ok((conv, div, consumed))
        }
        SeedToken::Loop {
            body,
            skip,
            diverging,
            converging,
        } => {
            let (body_head, body_tail) = build(bpmn, &tokens[1..1 + body], offset + 1)?;
            let (div, conv) = add_loop_gateways(bpmn, diverging, converging);
            bpmn.add_flow(PROCESS_ID, &conv, &body_head);
            bpmn.add_flow(PROCESS_ID, &body_tail, &div);
            let (skip_head, skip_tail) =
                build(bpmn, &tokens[1 + body..1 + body + skip], offset + 1 + body)?;
            bpmn.add_flow(PROCESS_ID, &div, &skip_head);
            bpmn.add_flow(PROCESS_ID, &skip_tail, &conv);
            Ok((conv, div, consumed))
        }
        SeedToken::Branch {
            kind,
            left,
            right,
            diverging,
            converging,
        } => {
            let (left_head, left_tail) = build(bpmn, &tokens[1..1 + left], offset + 1)?;
            let (right_head, right_tail) =
                build(bpmn, &tokens[1 + left..1 + left + right], offset + 1 + left)?;
            let div = gateway_node(*kind, GatewayDirection::Diverging, diverging);
            let conv = gateway_node(*kind, GatewayDirection::Converging, converging);
            let (div_id, conv_id) = (div.id.clone(), conv.id.clone());
            bpmn.add_node(div);
            bpmn.add_node(conv);
            bpmn.add_flow(PROCESS_ID, &div_id, &left_head);
            bpmn.add_flow(PROCESS_ID, &div_id, &right_head);
            bpmn.add_flow(PROCESS_ID, &left_tail, &conv_id);
            bpmn.add_flow(PROCESS_ID, &right_tail, &conv_id);
            Ok((div_id, conv_id, consumed))
        }
    }
}

/// Loop gateways are always exclusive: the diverging one is the choice to
/// continue looping or exit.
fn add_loop_gateways(bpmn: &mut Bpmn, diverging: &str, converging: &str) -> (String, String) {
    let div = gateway_node(GateKind::Exclusive, GatewayDirection::Diverging, diverging);
    let conv = gateway_node(GateKind::Exclusive, GatewayDirection::Converging, converging);
    let (div_id, conv_id) = (div.id.clone(), conv.id.clone());
    bpmn.add_node(div);
    bpmn.add_node(conv);
    (div_id, conv_id)
}
