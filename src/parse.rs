//! Parsers for the textual contracts spoken by the testbed.
//!
//! Four formats come back over the remote channel and each gets a real
//! parser here instead of best-effort string splitting, so malformed input
//! is detectable rather than silently producing wrong assignments:
//!
//! - the experiment listing, a nested literal mapping such as
//!   `{'rina': {'rina': ['demo', 'staging']}}`;
//! - the `expinfo` status output, a `key value` pair stream;
//! - the per-node topology map, `node,link:ip link:ip ...` lines
//!   terminated by a `# lans` sentinel section;
//! - the per-node interface map, `device ip` lines.
//!
//! These formats are an external, versioned contract owned by the testbed;
//! the parsers accept exactly what the current engine emits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Outcome of parsing a remote text blob.
///
/// `Malformed` carries the raw input for diagnosis; callers decide whether
/// to degrade, skip, or surface a parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome<T> {
    /// The input matched the contract.
    Parsed(T),

    /// The input did not match the contract.
    Malformed {
        /// The offending raw text.
        raw: String,
    },
}

impl<T> ParseOutcome<T> {
    /// Converts into an `Option`, dropping the raw text.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Malformed { .. } => None,
        }
    }

    /// Returns true if the input was parsed successfully.
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Project name -> experiment-group name -> experiment names.
///
/// The listing command nests the project twice; both levels are preserved
/// as received.
pub type ListingMap = HashMap<String, HashMap<String, Vec<String>>>;

/// Sentinel that opens the LAN section of a topology map; everything from
/// this line on is stripped before parsing.
pub const TOPOLOGY_MAP_SENTINEL: &str = "# lans";

/// One node's line in a topology map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyMapEntry {
    /// Physical node name as reported by the testbed.
    pub node: String,

    /// `link-identifier -> ip-address` pairs attached to the node.
    pub links: Vec<LinkAddress>,
}

/// A single `link:ip` pair from a topology map line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAddress {
    /// Logical link identifier.
    pub link: String,

    /// IP address assigned to this node's end of the link.
    pub ip: String,
}

/// Parsed topology map with per-fragment fallout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyMap {
    /// Entries that matched the contract.
    pub entries: Vec<TopologyMapEntry>,

    /// Raw fragments (lines or `link:ip` tokens) that did not parse and
    /// were skipped.
    pub malformed: Vec<String>,
}

/// One `device ip` line of an interface map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceMapEntry {
    /// Local device name, e.g. `eth2`.
    pub device: String,

    /// IP address configured on the device.
    pub ip: String,
}

/// Parsed interface map with per-line fallout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceMap {
    /// Entries that matched the contract.
    pub entries: Vec<InterfaceMapEntry>,

    /// Raw lines that did not parse and were skipped.
    pub malformed: Vec<String>,
}

/// Parses the nested literal mapping printed by the experiment listing
/// command.
///
/// The accepted grammar is the subset the listing engine actually emits:
/// single- or double-quoted strings, dictionaries, and lists of strings.
pub fn parse_experiment_listing(input: &str) -> ParseOutcome<ListingMap> {
    let mut cursor = Cursor::new(input);
    cursor.skip_ws();

    let listing = match parse_outer_dict(&mut cursor) {
        Some(listing) => listing,
        None => {
            return ParseOutcome::Malformed {
                raw: input.to_string(),
            }
        }
    };

    cursor.skip_ws();
    if !cursor.at_end() {
        return ParseOutcome::Malformed {
            raw: input.to_string(),
        };
    }

    ParseOutcome::Parsed(listing)
}

/// Extracts one field from an `expinfo` style `key value` pair stream.
///
/// Lines look like `State: active` or `State active`; lookup is by exact
/// key and the first match wins. A stream that contains no such key is
/// malformed from the caller's point of view.
pub fn parse_status_field(input: &str, key: &str) -> ParseOutcome<String> {
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, |c: char| c == ':' || c.is_whitespace());
        let field = match parts.next() {
            Some(field) => field.trim(),
            None => continue,
        };

        if field == key {
            if let Some(value) = parts.next() {
                let value = value.trim();
                if !value.is_empty() {
                    return ParseOutcome::Parsed(value.to_string());
                }
            }
        }
    }

    ParseOutcome::Malformed {
        raw: input.to_string(),
    }
}

/// Parses a topology map blob.
///
/// Everything from the [`TOPOLOGY_MAP_SENTINEL`] line on is stripped;
/// remaining comment lines are headers and skipped. Individually bad lines
/// or `link:ip` tokens are recorded in [`TopologyMap::malformed`] and
/// skipped; the blob as a whole is malformed only when it contains data
/// lines but none of them parse.
pub fn parse_topology_map(input: &str) -> ParseOutcome<TopologyMap> {
    let mut map = TopologyMap::default();
    let mut data_lines = 0usize;

    for line in input.lines() {
        let line = line.trim();
        if line.starts_with(TOPOLOGY_MAP_SENTINEL) {
            break;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        data_lines += 1;
        let Some((node, rest)) = line.split_once(',') else {
            map.malformed.push(line.to_string());
            continue;
        };

        let node = node.trim();
        if node.is_empty() {
            map.malformed.push(line.to_string());
            continue;
        }

        let mut links = Vec::new();
        for token in rest.split_whitespace() {
            match token.split_once(':') {
                Some((link, ip)) if !link.is_empty() && !ip.is_empty() => {
                    links.push(LinkAddress {
                        link: link.to_string(),
                        ip: ip.to_string(),
                    });
                }
                _ => map.malformed.push(token.to_string()),
            }
        }

        map.entries.push(TopologyMapEntry {
            node: node.to_string(),
            links,
        });
    }

    if map.entries.is_empty() && data_lines > 0 {
        return ParseOutcome::Malformed {
            raw: input.to_string(),
        };
    }

    ParseOutcome::Parsed(map)
}

/// Parses an interface map blob of `device ip` lines.
///
/// Bad lines are recorded and skipped; the blob as a whole is malformed
/// only when it contains data lines but none of them parse.
pub fn parse_interface_map(input: &str) -> ParseOutcome<InterfaceMap> {
    let mut map = InterfaceMap::default();
    let mut data_lines = 0usize;

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        data_lines += 1;
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(device), Some(ip), None) => {
                map.entries.push(InterfaceMapEntry {
                    device: device.to_string(),
                    ip: ip.to_string(),
                });
            }
            _ => map.malformed.push(line.to_string()),
        }
    }

    if map.entries.is_empty() && data_lines > 0 {
        return ParseOutcome::Malformed {
            raw: input.to_string(),
        };
    }

    ParseOutcome::Parsed(map)
}

// Recursive-descent machinery for the listing grammar.

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_string(&mut self) -> Option<String> {
        let quote = self.peek()?;
        if quote != b'\'' && quote != b'"' {
            return None;
        }
        self.pos += 1;

        let mut out = Vec::new();
        loop {
            match self.bump()? {
                b'\\' => out.push(self.bump()?),
                b if b == quote => break,
                b => out.push(b),
            }
        }
        String::from_utf8(out).ok()
    }
}

fn parse_outer_dict(cursor: &mut Cursor<'_>) -> Option<ListingMap> {
    if !cursor.eat(b'{') {
        return None;
    }

    let mut dict = ListingMap::new();
    cursor.skip_ws();
    if cursor.eat(b'}') {
        return Some(dict);
    }

    loop {
        cursor.skip_ws();
        let key = cursor.parse_string()?;
        cursor.skip_ws();
        if !cursor.eat(b':') {
            return None;
        }
        cursor.skip_ws();
        let inner = parse_inner_dict(cursor)?;
        dict.insert(key, inner);

        cursor.skip_ws();
        if cursor.eat(b',') {
            continue;
        }
        if cursor.eat(b'}') {
            return Some(dict);
        }
        return None;
    }
}

fn parse_inner_dict(cursor: &mut Cursor<'_>) -> Option<HashMap<String, Vec<String>>> {
    if !cursor.eat(b'{') {
        return None;
    }

    let mut dict = HashMap::new();
    cursor.skip_ws();
    if cursor.eat(b'}') {
        return Some(dict);
    }

    loop {
        cursor.skip_ws();
        let key = cursor.parse_string()?;
        cursor.skip_ws();
        if !cursor.eat(b':') {
            return None;
        }
        cursor.skip_ws();
        let list = parse_string_list(cursor)?;
        dict.insert(key, list);

        cursor.skip_ws();
        if cursor.eat(b',') {
            continue;
        }
        if cursor.eat(b'}') {
            return Some(dict);
        }
        return None;
    }
}

fn parse_string_list(cursor: &mut Cursor<'_>) -> Option<Vec<String>> {
    if !cursor.eat(b'[') {
        return None;
    }

    let mut list = Vec::new();
    cursor.skip_ws();
    if cursor.eat(b']') {
        return Some(list);
    }

    loop {
        cursor.skip_ws();
        list.push(cursor.parse_string()?);

        cursor.skip_ws();
        if cursor.eat(b',') {
            continue;
        }
        if cursor.eat(b']') {
            return Some(list);
        }
        return None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_nested_mapping() {
        let input = "{'rina': {'rina': ['demo', 'staging']}, 'other': {'other': []}}";
        let listing = parse_experiment_listing(input).ok().unwrap();

        assert_eq!(
            listing["rina"]["rina"],
            vec!["demo".to_string(), "staging".to_string()]
        );
        assert!(listing["other"]["other"].is_empty());
    }

    #[test]
    fn test_listing_double_quotes_and_whitespace() {
        let input = "{\n  \"rina\" : { \"rina\" : [ \"demo\" ] }\n}\n";
        let listing = parse_experiment_listing(input).ok().unwrap();
        assert_eq!(listing["rina"]["rina"], vec!["demo".to_string()]);
    }

    #[test]
    fn test_listing_empty_dict() {
        let listing = parse_experiment_listing("{}").ok().unwrap();
        assert!(listing.is_empty());
    }

    #[test]
    fn test_listing_malformed() {
        for input in ["", "not a dict", "{'rina': ", "{'rina': ['demo']} trailing"] {
            let outcome = parse_experiment_listing(input);
            assert!(!outcome.is_parsed(), "accepted malformed input: {input:?}");
        }
    }

    #[test]
    fn test_listing_malformed_keeps_raw() {
        match parse_experiment_listing("{'rina'") {
            ParseOutcome::Malformed { raw } => assert_eq!(raw, "{'rina'"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_status_field() {
        let input = "Experiment: rina/demo\nState: active\nNodes: 4\n";
        assert_eq!(
            parse_status_field(input, "State").ok().as_deref(),
            Some("active")
        );
    }

    #[test]
    fn test_status_field_space_separated() {
        assert_eq!(
            parse_status_field("State swapping\n", "State").ok().as_deref(),
            Some("swapping")
        );
    }

    #[test]
    fn test_status_field_missing() {
        assert!(!parse_status_field("Nodes: 4\n", "State").is_parsed());
        assert!(!parse_status_field("", "State").is_parsed());
    }

    #[test]
    fn test_topology_map() {
        let input = "# nodes: vname,links\n\
                     r2b1,link7:10.1.6.3 link6:10.1.5.3\n\
                     r3b2,link7:10.1.6.2\n\
                     # lans: vname,links\n\
                     lan0,garbage\n";
        let map = parse_topology_map(input).ok().unwrap();

        assert_eq!(map.entries.len(), 2);
        assert_eq!(map.entries[0].node, "r2b1");
        assert_eq!(
            map.entries[0].links,
            vec![
                LinkAddress {
                    link: "link7".to_string(),
                    ip: "10.1.6.3".to_string()
                },
                LinkAddress {
                    link: "link6".to_string(),
                    ip: "10.1.5.3".to_string()
                },
            ]
        );
        // The lan section past the sentinel must not leak into entries.
        assert!(map.entries.iter().all(|e| e.node != "lan0"));
        assert!(map.malformed.is_empty());
    }

    #[test]
    fn test_topology_map_skips_bad_fragments() {
        let input = "r2b1,link7:10.1.6.3 bogus-token\nno-comma-line\n";
        let map = parse_topology_map(input).ok().unwrap();

        assert_eq!(map.entries.len(), 1);
        assert_eq!(map.entries[0].links.len(), 1);
        assert_eq!(
            map.malformed,
            vec!["bogus-token".to_string(), "no-comma-line".to_string()]
        );
    }

    #[test]
    fn test_topology_map_all_garbage_is_malformed() {
        assert!(!parse_topology_map("complete nonsense\n").is_parsed());
    }

    #[test]
    fn test_topology_map_empty_is_parsed_empty() {
        let map = parse_topology_map("").ok().unwrap();
        assert!(map.entries.is_empty());
    }

    #[test]
    fn test_interface_map() {
        let input = "eth1 10.1.5.3\neth2 10.1.6.3\n";
        let map = parse_interface_map(input).ok().unwrap();

        assert_eq!(map.entries.len(), 2);
        assert_eq!(map.entries[1].device, "eth2");
        assert_eq!(map.entries[1].ip, "10.1.6.3");
    }

    #[test]
    fn test_interface_map_skips_bad_lines() {
        let input = "eth1 10.1.5.3\neth2 10.1.6.3 extra\n";
        let map = parse_interface_map(input).ok().unwrap();

        assert_eq!(map.entries.len(), 1);
        assert_eq!(map.malformed, vec!["eth2 10.1.6.3 extra".to_string()]);
    }

    #[test]
    fn test_interface_map_all_garbage_is_malformed() {
        assert!(!parse_interface_map("one\ntwo three four\n").is_parsed());
    }
}
