//! Diagram export of the transition graph
//!
//! Output is a pure function of the transition table and the current state:
//! edges are sorted by `(source, event)`, states lexicographically.

use crate::StateMachine;

/// Supported diagram formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizeKind {
    /// Graphviz DOT
    Graphviz,
    /// PlantUML state diagram
    #[cfg(feature = "plantuml")]
    #[cfg_attr(docsrs, doc(cfg(feature = "plantuml")))]
    PlantUml,
}

/// Render `fsm` as a Graphviz digraph, marking the current state in red
pub fn visualize(fsm: &StateMachine) -> String {
    let current = fsm.current();
    let edges = sorted_edges(fsm);
    let states = fsm.states();

    let mut dot = String::from("digraph fsm {\n");
    for (src, event, dst) in &edges {
        dot.push_str(&format!("    \"{src}\" -> \"{dst}\" [ label = \"{event}\" ];\n"));
    }
    dot.push('\n');

    for state in &states {
        if *state == current {
            dot.push_str(&format!("    \"{state}\" [color = \"red\"];\n"));
        } else {
            dot.push_str(&format!("    \"{state}\";\n"));
        }
    }
    dot.push_str("}\n");
    dot
}

/// Render `fsm` in the requested format
pub fn visualize_with(fsm: &StateMachine, kind: VisualizeKind) -> String {
    match kind {
        VisualizeKind::Graphviz => visualize(fsm),
        #[cfg(feature = "plantuml")]
        VisualizeKind::PlantUml => crate::plantuml::generate_plantuml(fsm),
    }
}

/// Transition table as `(src, event, dst)`, sorted by source then event
pub(crate) fn sorted_edges(fsm: &StateMachine) -> Vec<(&str, &str, &str)> {
    let mut edges: Vec<(&str, &str, &str)> = fsm
        .transitions()
        .map(|(event, src, dst)| (src, event, dst))
        .collect();
    edges.sort();
    edges
}
