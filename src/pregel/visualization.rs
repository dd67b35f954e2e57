//! Mermaid rendering helpers for workflow graphs
//!
//! The entry points live on `PregelRuntime` (`to_mermaid*`); this module
//! holds the node/edge formatters they share.
//!
//! # Node shapes
//!
//! | NodeKind  | Shape             | Mermaid syntax |
//! |-----------|-------------------|----------------|
//! | Agent     | Rectangle         | `id[label]`    |
//! | Tool      | Subroutine        | `id[[label]]`  |
//! | Router    | Diamond           | `id{label}`    |
//! | SubAgent  | Cylinder          | `id[(label)]`  |
//! | FanOut    | Parallelogram     | `id[/label\]`  |
//! | FanIn     | Reverse para.     | `id[\label/]`  |
//! | Transform | Rounded rectangle | `id(label)`    |
//! | unknown   | Stadium           | `id([label])`  |

use super::vertex::{VertexId, VertexState};
use crate::workflow::NodeKind;

/// Sanitize a vertex id for use as a Mermaid node identifier
///
/// Mermaid ids must be alphanumeric plus underscores.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Render a node declaration with a kind-appropriate shape
pub fn render_node(id: &VertexId, kind: Option<&NodeKind>) -> String {
    let safe_id = sanitize_id(id.as_str());
    let label = id.as_str();

    match kind {
        Some(NodeKind::Agent(_)) => format!("    {}[{}]", safe_id, label),
        Some(NodeKind::Tool(_)) => format!("    {}[[{}]]", safe_id, label),
        Some(NodeKind::Router(_)) => format!("    {}{{{}}}", safe_id, label),
        Some(NodeKind::SubAgent(_)) => format!("    {}[({})]", safe_id, label),
        Some(NodeKind::FanOut(_)) => format!("    {}[/{}\\]", safe_id, label),
        Some(NodeKind::FanIn(_)) => format!("    {}[\\{}/]", safe_id, label),
        Some(NodeKind::Transform(_)) => format!("    {}({})", safe_id, label),
        None => format!("    {}([{}])", safe_id, label),
    }
}

/// Render a node with a state-based CSS class appended
pub fn render_node_with_state(
    id: &VertexId,
    kind: Option<&NodeKind>,
    state: Option<&VertexState>,
) -> String {
    let base = render_node(id, kind);
    match state {
        Some(VertexState::Active) => format!("{}:::active", base),
        Some(VertexState::Halted) => format!("{}:::halted", base),
        Some(VertexState::Completed) => format!("{}:::completed", base),
        None => base,
    }
}

/// Render an edge; labeled edges use the dotted conditional arrow
pub fn render_edge(from: &VertexId, to: &VertexId, label: Option<&str>) -> String {
    let from_safe = sanitize_id(from.as_str());
    let to_safe = sanitize_id(to.as_str());

    match label {
        Some(label) => format!("    {} -. \"{}\" .-> {}", from_safe, label, to_safe),
        None => format!("    {} --> {}", from_safe, to_safe),
    }
}

/// CSS class definitions for vertex states
pub const STYLE_DEFS: &str = r#"
    classDef active fill:#90EE90,stroke:#228B22,stroke-width:2px
    classDef halted fill:#FFE4B5,stroke:#FF8C00,stroke-width:1px
    classDef completed fill:#D3D3D3,stroke:#696969,stroke-width:1px
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_punctuation() {
        assert_eq!(sanitize_id("simple"), "simple");
        assert_eq!(sanitize_id("with-dash"), "with_dash");
        assert_eq!(sanitize_id("with.dot"), "with_dot");
        assert_eq!(sanitize_id("a/b/c"), "a_b_c");
        assert_eq!(sanitize_id("CamelCase123"), "CamelCase123");
    }

    #[test]
    fn edge_rendering() {
        let from = VertexId::new("agent");
        let to = VertexId::new("tool");
        assert_eq!(render_edge(&from, &to, None), "    agent --> tool");
        assert_eq!(
            render_edge(&from, &to, Some("yes")),
            "    agent -. \"yes\" .-> tool"
        );
    }

    #[test]
    fn node_shapes_by_kind() {
        let id = VertexId::new("n");
        assert_eq!(
            render_node(&id, Some(&NodeKind::Agent(Default::default()))),
            "    n[n]"
        );
        assert_eq!(
            render_node(&id, Some(&NodeKind::Tool(Default::default()))),
            "    n[[n]]"
        );
        assert_eq!(
            render_node(&id, Some(&NodeKind::Router(Default::default()))),
            "    n{n}"
        );
        assert_eq!(
            render_node(&id, Some(&NodeKind::FanOut(Default::default()))),
            "    n[/n\\]"
        );
        assert_eq!(
            render_node(&id, Some(&NodeKind::FanIn(Default::default()))),
            "    n[\\n/]"
        );
        assert_eq!(render_node(&id, None), "    n([n])");
    }

    #[test]
    fn state_classes_appended() {
        let id = VertexId::new("agent");
        let kind = NodeKind::Agent(Default::default());

        assert!(
            render_node_with_state(&id, Some(&kind), Some(&VertexState::Active))
                .ends_with(":::active")
        );
        assert!(
            render_node_with_state(&id, Some(&kind), Some(&VertexState::Halted))
                .ends_with(":::halted")
        );
        assert!(
            render_node_with_state(&id, Some(&kind), Some(&VertexState::Completed))
                .ends_with(":::completed")
        );
    }
}
