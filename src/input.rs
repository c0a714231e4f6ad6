use alloc::vec::Vec;

use crate::{CfgUpdate, FlowGraph, NodeId};

/// A test graph description in the textual exchange format:
///
/// ```text
/// p <nodes> <arcs> <entry> <dummy>
/// a <x> <y>          initial arc
/// e                  end of initial graph
/// i <x> <y>          future insertion update
/// d <x> <y>          future deletion update
/// ```
///
/// Node ids in the text are 1-based and are mapped to 0-based [NodeId]s.
/// Records are processed in order; reading stops at the first empty line.
/// Tokens past the ones a record needs are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputGraph {
    num_nodes: u32,
    entry: NodeId,
    arcs: Vec<(NodeId, NodeId)>,
    updates: Vec<CfgUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphParseError {
    #[error("line {line}: unknown action '{action}'")]
    UnknownAction { line: usize, action: char },
    #[error("line {line}: malformed '{action}' record")]
    Malformed { line: usize, action: char },
    #[error("line {line}: node id {id} out of range")]
    NodeOutOfRange { line: usize, id: u32 },
    #[error("line {line}: graph described twice")]
    DuplicateHeader { line: usize },
    #[error("missing 'p' header record")]
    MissingHeader,
}

impl InputGraph {
    pub fn parse(text: &str) -> Result<Self, GraphParseError> {
        let mut header: Option<(u32, u32)> = None;
        let mut arcs = Vec::new();
        let mut updates = Vec::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            if raw_line.trim().is_empty() {
                break;
            }

            let mut tokens = raw_line.split_whitespace();
            let action = tokens.next().unwrap();
            if action.len() != 1 {
                return Err(GraphParseError::UnknownAction {
                    line,
                    action: action.chars().next().unwrap(),
                });
            }
            let action = action.chars().next().unwrap();

            match action {
                'p' => {
                    if header.is_some() {
                        return Err(GraphParseError::DuplicateHeader { line });
                    }
                    let num_nodes = parse_field(&mut tokens, line, action)?;
                    let _num_arcs: u32 = parse_field(&mut tokens, line, action)?;
                    let entry = parse_field(&mut tokens, line, action)?;
                    let _dummy: u32 = parse_field(&mut tokens, line, action)?;
                    if entry == 0 || entry > num_nodes {
                        return Err(GraphParseError::NodeOutOfRange { line, id: entry });
                    }
                    header = Some((num_nodes, entry));
                }
                'a' | 'i' | 'd' => {
                    let (num_nodes, _) = header.ok_or(GraphParseError::MissingHeader)?;
                    let x = parse_node(&mut tokens, line, action, num_nodes)?;
                    let y = parse_node(&mut tokens, line, action, num_nodes)?;
                    match action {
                        'a' => arcs.push((x, y)),
                        'i' => updates.push(CfgUpdate::insert(x, y)),
                        _ => updates.push(CfgUpdate::delete(x, y)),
                    }
                }
                'e' => (),
                _ => return Err(GraphParseError::UnknownAction { line, action }),
            }
        }

        let (num_nodes, entry) = header.ok_or(GraphParseError::MissingHeader)?;
        Ok(Self {
            num_nodes,
            entry: NodeId::new(entry - 1),
            arcs,
            updates,
        })
    }

    #[inline]
    pub fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    #[inline]
    pub fn arcs(&self) -> &[(NodeId, NodeId)] {
        &self.arcs
    }

    /// The update schedule to replay after the initial graph, in file order.
    #[inline]
    pub fn updates(&self) -> &[CfgUpdate] {
        &self.updates
    }

    /// Materialize the initial graph, without any updates applied.
    pub fn build(&self) -> FlowGraph {
        let mut graph = FlowGraph::new(self.num_nodes as usize, self.entry);
        for (from, to) in self.arcs.iter().copied() {
            graph.add_arc(from, to);
        }
        graph
    }
}

fn parse_field<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut I,
    line: usize,
    action: char,
) -> Result<u32, GraphParseError> {
    tokens
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or(GraphParseError::Malformed { line, action })
}

fn parse_node<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut I,
    line: usize,
    action: char,
    num_nodes: u32,
) -> Result<NodeId, GraphParseError> {
    let id = parse_field(tokens, line, action)?;
    if id == 0 || id > num_nodes {
        return Err(GraphParseError::NodeOutOfRange { line, id });
    }
    Ok(NodeId::new(id - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CfgUpdateKind;

    #[test]
    fn parses_graph_and_updates() {
        let text = "p 4 3 1 0\n\
                    a 1 2\n\
                    a 2 3\n\
                    a 3 4\n\
                    e\n\
                    i 1 4\n\
                    d 3 4\n";
        let input = InputGraph::parse(text).unwrap();
        assert_eq!(input.num_nodes(), 4);
        assert_eq!(input.entry(), NodeId::new(0));
        assert_eq!(input.arcs().len(), 3);
        assert_eq!(input.updates().len(), 2);
        assert_eq!(input.updates()[0].kind(), CfgUpdateKind::Insert);
        assert_eq!(input.updates()[1].kind(), CfgUpdateKind::Delete);

        let graph = input.build();
        assert!(graph.has_arc(NodeId::new(0), NodeId::new(1)));
        assert!(graph.has_arc(NodeId::new(2), NodeId::new(3)));
    }

    #[test]
    fn stops_at_blank_line() {
        let text = "p 2 1 1 0\na 1 2\n\na 2 1\n";
        let input = InputGraph::parse(text).unwrap();
        assert_eq!(input.arcs().len(), 1);
    }

    #[test]
    fn rejects_unknown_action() {
        let err = InputGraph::parse("p 2 0 1 0\nq 1 2\n").unwrap_err();
        assert_eq!(err, GraphParseError::UnknownAction { line: 2, action: 'q' });
    }

    #[test]
    fn rejects_malformed_record() {
        let err = InputGraph::parse("p 2 0 1 0\na 1\n").unwrap_err();
        assert_eq!(err, GraphParseError::Malformed { line: 2, action: 'a' });
    }

    #[test]
    fn rejects_out_of_range_node() {
        let err = InputGraph::parse("p 2 0 1 0\na 1 3\n").unwrap_err();
        assert_eq!(err, GraphParseError::NodeOutOfRange { line: 2, id: 3 });
    }

    #[test]
    fn rejects_missing_header() {
        let err = InputGraph::parse("a 1 2\n").unwrap_err();
        assert_eq!(err, GraphParseError::MissingHeader);
    }
}
