use std::fs;
use std::io;
use std::path::Path;

use crate::filename::FragmentKind;

/// Wraps fragment content in the update that applies it to `graph`.
pub fn update_for(kind: FragmentKind, graph: &str, content: &str) -> String {
    let operation = match kind {
        FragmentKind::Additions => "INSERT DATA",
        FragmentKind::Subtractions => "DELETE DATA",
    };
    format!("{operation} {{\n  GRAPH <{graph}> {{\n{content}\n  }}\n}}\n")
}

pub fn fragment_update(path: &Path, kind: FragmentKind, graph: &str) -> io::Result<String> {
    let content = fs::read_to_string(path)?;
    Ok(update_for(kind, graph, content.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additions_insert_and_subtractions_delete() {
        let triple = "<http://a> <http://b> <http://c> .";
        assert_eq!(
            update_for(FragmentKind::Additions, "http://vivo/kb", triple),
            "INSERT DATA {\n  GRAPH <http://vivo/kb> {\n<http://a> <http://b> <http://c> .\n  }\n}\n"
        );
        assert!(update_for(FragmentKind::Subtractions, "g", triple).starts_with("DELETE DATA {"));
    }
}
