//! PlantUML diagram generation

use crate::visualizer::sorted_edges;
use crate::StateMachine;

/// Generate a PlantUML state diagram from the transition table
///
/// States are declared with stable aliases (`id0`, `id1`, ...) assigned in
/// sorted order, so names that are not valid PlantUML identifiers still render.
pub fn generate_plantuml(fsm: &StateMachine) -> String {
    let current = fsm.current();
    let states = fsm.states();
    let alias = |name: &str| {
        states
            .iter()
            .position(|state| state == name)
            .map(|index| format!("id{index}"))
            .unwrap_or_default()
    };

    let mut plantuml = String::new();
    plantuml.push_str("@startuml\n");
    plantuml.push_str("skinparam state {\n");
    plantuml.push_str("  BackgroundColor<<Current>> YellowGreen\n");
    plantuml.push_str("}\n\n");

    for (index, state) in states.iter().enumerate() {
        if *state == current {
            plantuml.push_str(&format!("state \"{state}\" as id{index} <<Current>>\n"));
        } else {
            plantuml.push_str(&format!("state \"{state}\" as id{index}\n"));
        }
    }

    if !states.is_empty() {
        plantuml.push('\n');
    }

    for (src, event, dst) in sorted_edges(fsm) {
        plantuml.push_str(&format!("{} --> {} : {}\n", alias(src), alias(dst), event));
    }

    plantuml.push_str("@enduml\n");
    plantuml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visualizer::{visualize_with, VisualizeKind};

    #[test]
    fn test_plantuml_generation() {
        let fsm = StateMachine::builder("green")
            .event("warn", ["green"], "yellow")
            .event("stop", ["yellow"], "red")
            .event("go", ["red"], "green")
            .build()
            .unwrap();
        fsm.event("warn").unwrap();

        let expected = "@startuml
skinparam state {
  BackgroundColor<<Current>> YellowGreen
}

state \"green\" as id0
state \"red\" as id1
state \"yellow\" as id2 <<Current>>

id0 --> id2 : warn
id1 --> id0 : go
id2 --> id1 : stop
@enduml
";
        assert_eq!(generate_plantuml(&fsm), expected);
        assert_eq!(visualize_with(&fsm, VisualizeKind::PlantUml), expected);
    }

    #[test]
    fn test_plantuml_quotes_awkward_names() {
        let fsm = StateMachine::builder("waiting for ack")
            .event("ack received", ["waiting for ack"], "open")
            .build()
            .unwrap();

        let plantuml = generate_plantuml(&fsm);
        assert!(plantuml.contains("state \"waiting for ack\" as id1 <<Current>>\n"));
        assert!(plantuml.contains("id1 --> id0 : ack received\n"));
    }
}
