use std::fmt::Write;

use tree_sync::PathNode;

/// Print a snapshot.
///
/// - `json = true`: the tree as JSON on stdout (pretty unless `compact`).
/// - `json = false`: an indented listing, folders suffixed with `/`.
///
/// A one-line summary goes to **stderr** so stdout stays clean for
/// downstream JSON consumers.
pub fn print_tree(tree: &PathNode, json: bool, compact: bool) {
    if json {
        let rendered = if compact {
            serde_json::to_string(tree)
        } else {
            serde_json::to_string_pretty(tree)
        };
        match rendered {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("error serialising tree: {}", e),
        }
    } else {
        print!("{}", render_text(tree));
    }

    let folders = tree.iter().filter(|n| n.is_folder).count();
    eprintln!(
        "{}: {} entries ({} folders)",
        tree.path.display(),
        tree.len() - 1,
        folders.saturating_sub(usize::from(tree.is_folder)),
    );
}

/// Render a tree as an indented listing, two spaces per level.
pub fn render_text(tree: &PathNode) -> String {
    let mut out = String::new();
    render_node(tree, 0, &mut out);
    out
}

fn render_node(node: &PathNode, depth: usize, out: &mut String) {
    let suffix = if node.is_folder { "/" } else { "" };
    let _ = writeln!(out, "{:indent$}{}{}", "", node.name, suffix, indent = depth * 2);
    for child in node.children() {
        render_node(child, depth + 1, out);
    }
}
