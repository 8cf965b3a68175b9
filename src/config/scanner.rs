//! Config block scanner.
//!
//! Line-oriented scanning primitives for FortiGate-style configuration
//! text: `config <section> ... end` blocks, `edit <id> ... next` entries,
//! `set <key> <values...>` directives, and the `config vdom` wrapper that
//! scopes everything inside it to a named VDOM.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `edit <id>` where the id is either quoted or a bare token.
    static ref EDIT_LINE: Regex = Regex::new(r#"^edit\s+(?:"([^"]+)"|'([^']+)'|(\S+))\s*$"#).unwrap();

    /// `set <key> <rest>` - the rest is tokenized separately.
    static ref SET_LINE: Regex = Regex::new(r"^set\s+(\S+)\s+(.*)$").unwrap();
}

/// One VDOM-scoped slice of the document.
#[derive(Debug, Clone)]
pub struct VdomSection {
    pub name: String,
    pub body: String,
}

/// One `edit ... next` entry within a block.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: String,
    pub body: String,
}

/// Parse an `edit` line, accepting quoted and bare identifiers.
pub fn parse_edit_id(line: &str) -> Option<String> {
    let caps = EDIT_LINE.captures(line.trim())?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().to_string())
}

/// Split a document into VDOM sections.
///
/// Multi-VDOM exports wrap per-VDOM config in `config vdom` / `edit
/// <name>` blocks; the declaration-only wrapper (`edit name` / `next`)
/// and the full-body wrapper both occur, so bodies are merged by name.
/// Content outside any wrapper (the `config global` part) is merged
/// into the `fallback_name` section: its entries carry their own
/// `set vdom` assignments. A document with no `config vdom` wrapper at
/// all yields one implicit section named `fallback_name` holding the
/// whole document.
pub fn split_vdom_sections(content: &str, fallback_name: &str) -> Vec<VdomSection> {
    let mut sections: Vec<VdomSection> = Vec::new();
    let mut outside: Vec<String> = Vec::new();
    let mut in_wrapper = false;
    let mut current: Option<(String, Vec<String>, usize)> = None; // (name, lines, depth)

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some((_, lines, depth)) = current.as_mut() {
            if trimmed.starts_with("config ") {
                *depth += 1;
                lines.push(line.to_string());
            } else if trimmed == "end" {
                if *depth > 0 {
                    *depth -= 1;
                    lines.push(line.to_string());
                } else {
                    // `end` at entry depth closes the whole wrapper.
                    let (name, lines, _) = current.take().unwrap();
                    merge_section(&mut sections, name, lines);
                    in_wrapper = false;
                }
            } else if trimmed == "next" && *depth == 0 {
                let (name, lines, _) = current.take().unwrap();
                merge_section(&mut sections, name, lines);
            } else {
                lines.push(line.to_string());
            }
            continue;
        }

        if in_wrapper {
            if let Some(id) = parse_edit_id(trimmed) {
                current = Some((id, Vec::new(), 0));
            } else if trimmed == "end" {
                in_wrapper = false;
            }
            continue;
        }

        if trimmed == "config vdom" {
            in_wrapper = true;
        } else {
            outside.push(line.to_string());
        }
    }

    if let Some((name, lines, _)) = current.take() {
        merge_section(&mut sections, name, lines);
    }

    if sections.is_empty() {
        return vec![VdomSection {
            name: fallback_name.to_string(),
            body: content.to_string(),
        }];
    }

    // Global-scope blocks live outside the wrappers in multi-VDOM
    // exports; their entries name their VDOM explicitly.
    if outside.iter().any(|l| !l.trim().is_empty()) {
        merge_section(&mut sections, fallback_name.to_string(), outside);
    }
    sections
}

fn merge_section(sections: &mut Vec<VdomSection>, name: String, lines: Vec<String>) {
    let body = lines.join("\n");
    if let Some(existing) = sections.iter_mut().find(|s| s.name == name) {
        if !body.trim().is_empty() {
            existing.body.push('\n');
            existing.body.push_str(&body);
        }
    } else {
        sections.push(VdomSection { name, body });
    }
}

/// Find the body of a `config <section>` block, excluding the opening
/// line and the matching `end`. Nested `config ... end` pairs inside
/// entries are depth-tracked.
pub fn find_block<'a>(content: &'a str, section: &str) -> Option<String> {
    let header = format!("config {}", section);
    let mut collecting = false;
    let mut depth = 0usize;
    let mut lines: Vec<&'a str> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if !collecting {
            if trimmed == header {
                collecting = true;
            }
            continue;
        }
        if trimmed.starts_with("config ") {
            depth += 1;
            lines.push(line);
        } else if trimmed == "end" {
            if depth > 0 {
                depth -= 1;
                lines.push(line);
            } else {
                return Some(lines.join("\n"));
            }
        } else {
            lines.push(line);
        }
    }

    // Unterminated block: best effort, return what was collected.
    if collecting {
        Some(lines.join("\n"))
    } else {
        None
    }
}

/// Split a block body into its `edit <id> ... next` entries.
///
/// `edit` and `next` only delimit entries at the block's own nesting
/// level; nested `config ... end` sub-blocks stay inside the entry body.
pub fn split_entries(block_body: &str) -> Vec<Entry> {
    let mut entries: Vec<Entry> = Vec::new();
    let mut current: Option<(String, Vec<String>, usize)> = None;

    for line in block_body.lines() {
        let trimmed = line.trim();

        if current.is_some() {
            let (_, lines, depth) = current.as_mut().unwrap();
            if trimmed.starts_with("config ") {
                *depth += 1;
                lines.push(line.to_string());
                continue;
            }
            if trimmed == "end" && *depth > 0 {
                *depth -= 1;
                lines.push(line.to_string());
                continue;
            }
            if *depth > 0 {
                lines.push(line.to_string());
                continue;
            }
            if trimmed == "next" {
                let (id, lines, _) = current.take().unwrap();
                entries.push(Entry {
                    id,
                    body: lines.join("\n"),
                });
                continue;
            }
            if let Some(id) = parse_edit_id(trimmed) {
                // A new `edit` also terminates an unterminated entry.
                let (prev_id, lines, _) = current.take().unwrap();
                entries.push(Entry {
                    id: prev_id,
                    body: lines.join("\n"),
                });
                current = Some((id, Vec::new(), 0));
                continue;
            }
            lines.push(line.to_string());
            continue;
        }

        // Lines before the first `edit` are block preamble.
        if let Some(id) = parse_edit_id(trimmed) {
            current = Some((id, Vec::new(), 0));
        }
    }

    if let Some((id, lines, _)) = current.take() {
        entries.push(Entry {
            id,
            body: lines.join("\n"),
        });
    }
    entries
}

/// First `set <key> ...` value in an entry body, as the raw remainder of
/// the line with surrounding quotes stripped from single-token values.
pub fn set_value(body: &str, key: &str) -> Option<String> {
    for line in body.lines() {
        if let Some(caps) = SET_LINE.captures(line.trim()) {
            if &caps[1] == key {
                let rest = caps[2].trim();
                let tokens = tokenize_values(rest);
                return Some(if tokens.len() == 1 {
                    tokens.into_iter().next().unwrap()
                } else {
                    rest.to_string()
                });
            }
        }
    }
    None
}

/// List-valued `set <key> ...` directive, tokenized with quoted
/// multi-word tokens kept whole.
pub fn set_list(body: &str, key: &str) -> Vec<String> {
    for line in body.lines() {
        if let Some(caps) = SET_LINE.captures(line.trim()) {
            if &caps[1] == key {
                return tokenize_values(caps[2].trim());
            }
        }
    }
    Vec::new()
}

/// Tokenize space-separated values, respecting double-quoted tokens
/// that may contain spaces.
pub fn tokenize_values(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                if in_quotes {
                    tokens.push(std::mem::take(&mut current));
                    in_quotes = false;
                } else {
                    in_quotes = true;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_edit_id_forms() {
        assert_eq!(parse_edit_id(r#"edit "port1""#), Some("port1".to_string()));
        assert_eq!(parse_edit_id("edit 42"), Some("42".to_string()));
        assert_eq!(
            parse_edit_id(r#"edit "DMZ Servers""#),
            Some("DMZ Servers".to_string())
        );
        assert_eq!(parse_edit_id("set ip 1.2.3.4"), None);
    }

    #[test]
    fn test_tokenize_quoted_values() {
        let tokens = tokenize_values(r#""web-srv" "DMZ Servers" all"#);
        assert_eq!(tokens, vec!["web-srv", "DMZ Servers", "all"]);
    }

    #[test]
    fn test_find_block_and_entries() {
        let doc = "\
config system interface
    edit \"port1\"
        set ip 192.0.2.1 255.255.255.0
        set vdom \"root\"
    next
    edit \"port2\"
        set status down
    next
end
config firewall policy
end
";
        let block = find_block(doc, "system interface").unwrap();
        let entries = split_entries(&block);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "port1");
        assert_eq!(
            set_value(&entries[0].body, "ip"),
            Some("192.0.2.1 255.255.255.0".to_string())
        );
        assert_eq!(set_value(&entries[1].body, "status"), Some("down".to_string()));
    }

    #[test]
    fn test_nested_config_inside_entry() {
        let doc = "\
config firewall policy
    edit 1
        set srcaddr \"all\"
        config extra
            edit sub
            next
        end
    next
end
";
        let block = find_block(doc, "firewall policy").unwrap();
        let entries = split_entries(&block);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].body.contains("config extra"));
    }

    #[test]
    fn test_split_vdom_sections_merges_declaration_and_body() {
        let doc = "\
config vdom
edit root
next
edit dmz
next
end
config global
    set hostname \"fw1\"
end
config vdom
edit root
config system interface
    edit \"port1\"
    next
end
end
";
        let sections = split_vdom_sections(doc, "root");
        let names: Vec<&str> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["root", "dmz"]);
        assert!(sections[0].body.contains("config system interface"));
        assert!(sections[1].body.trim().is_empty());
    }

    #[test]
    fn test_no_vdom_wrapper_falls_back() {
        let doc = "config system interface\nend\n";
        let sections = split_vdom_sections(doc, "root");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name, "root");
        assert_eq!(sections[0].body, doc);
    }
}
