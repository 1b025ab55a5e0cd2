//! Hierarchy bookkeeping.
//!
//! Each project owns a parent/children forest over its entities. The two
//! maps must stay mutually consistent and acyclic. Assigning a parent
//! path clamps to the deepest valid ancestor (warning per dropped
//! segment) and truncates at the configured max depth, keeping the
//! segments nearest the root.

use crate::model::Project;
use aavion_utils::error::AavionError;

/// Default `hierarchy.max_depth` when the config key is absent.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Path from the root to `entity`, inclusive.
#[must_use]
pub fn path_of(project: &Project, entity: &str) -> Vec<String> {
    let mut path = vec![entity.to_string()];
    let mut current = entity.to_string();
    while let Some(parent) = project.hierarchy.parents.get(&current) {
        // A corrupt self-link must not loop forever.
        if path.contains(parent) {
            break;
        }
        path.push(parent.clone());
        current = parent.clone();
    }
    path.reverse();
    path
}

/// Every descendant of `entity`, depth-first.
#[must_use]
pub fn descendants(project: &Project, entity: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack: Vec<String> = project
        .hierarchy
        .children
        .get(entity)
        .cloned()
        .unwrap_or_default();
    while let Some(child) = stack.pop() {
        if out.contains(&child) {
            continue;
        }
        if let Some(grandchildren) = project.hierarchy.children.get(&child) {
            stack.extend(grandchildren.iter().cloned());
        }
        out.push(child);
    }
    out
}

/// Direct children of `entity`.
#[must_use]
pub fn children_of(project: &Project, entity: &str) -> Vec<String> {
    project
        .hierarchy
        .children
        .get(entity)
        .cloned()
        .unwrap_or_default()
}

/// Detach `entity` from its current parent, if any.
pub fn detach(project: &mut Project, entity: &str) {
    if let Some(parent) = project.hierarchy.parents.remove(entity) {
        if let Some(siblings) = project.hierarchy.children.get_mut(&parent) {
            siblings.retain(|s| s != entity);
            if siblings.is_empty() {
                project.hierarchy.children.remove(&parent);
            }
        }
    }
}

/// Promote every child of `entity` to root level.
pub fn promote_children(project: &mut Project, entity: &str) {
    if let Some(children) = project.hierarchy.children.remove(entity) {
        for child in children {
            project.hierarchy.parents.remove(&child);
        }
    }
}

/// Remove `entity` from the forest entirely. With `recursive`, returns
/// the removed subtree (deepest first); otherwise children are promoted.
pub fn remove_entity(project: &mut Project, entity: &str, recursive: bool) -> Vec<String> {
    let removed = if recursive {
        let subtree = descendants(project, entity);
        for child in &subtree {
            detach(project, child);
            project.hierarchy.children.remove(child);
        }
        subtree
    } else {
        promote_children(project, entity);
        Vec::new()
    };
    detach(project, entity);
    project.hierarchy.children.remove(entity);
    removed
}

/// Assign `parent` to `child`, refusing cycles.
pub fn assign_parent(
    project: &mut Project,
    child: &str,
    parent: &str,
) -> Result<(), AavionError> {
    if child == parent || descendants(project, child).iter().any(|d| d == parent) {
        return Err(AavionError::InvalidParameter {
            name: "parent".to_string(),
            reason: format!("'{parent}' is a descendant of '{child}'"),
        });
    }
    detach(project, child);
    project
        .hierarchy
        .parents
        .insert(child.to_string(), parent.to_string());
    let siblings = project
        .hierarchy
        .children
        .entry(parent.to_string())
        .or_default();
    if !siblings.iter().any(|s| s == child) {
        siblings.push(child.to_string());
    }
    Ok(())
}

/// Resolve a requested parent path for `entity` and reassign its parent.
///
/// The path lists ancestors root-first, ending at the desired direct
/// parent. Segments beyond `max_depth` are dropped (root-most segments
/// kept); segments naming unknown entities clamp the path at the deepest
/// valid ancestor. A cycle refuses the assignment. Returns warnings; an
/// empty resolved path moves the entity to root level.
pub fn assign_parent_path(
    project: &mut Project,
    entity: &str,
    path: &[String],
    max_depth: usize,
) -> Vec<String> {
    let mut warnings = Vec::new();

    let mut requested: Vec<&String> = path.iter().collect();
    if requested.len() > max_depth {
        warnings.push(format!(
            "parent path truncated to {max_depth} segments ({} dropped)",
            requested.len() - max_depth
        ));
        requested.truncate(max_depth);
    }

    let mut resolved: Vec<String> = Vec::new();
    for segment in requested {
        if project.entities.contains_key(segment.as_str()) {
            resolved.push(segment.clone());
        } else {
            warnings.push(format!(
                "unknown hierarchy segment '{segment}', clamping to deepest valid ancestor"
            ));
            break;
        }
    }

    match resolved.last() {
        None => {
            detach(project, entity);
        }
        Some(parent) => {
            let parent = parent.clone();
            if let Err(err) = assign_parent(project, entity, &parent) {
                warnings.push(format!("parent assignment refused: {err}"));
            }
        }
    }
    warnings
}

/// Verify that `parents` and `children` are exact inverses and acyclic.
#[must_use]
pub fn consistency_issues(project: &Project) -> Vec<String> {
    let mut issues = Vec::new();
    for (child, parent) in &project.hierarchy.parents {
        let listed = project
            .hierarchy
            .children
            .get(parent)
            .is_some_and(|c| c.iter().any(|s| s == child));
        if !listed {
            issues.push(format!("'{child}' not listed under parent '{parent}'"));
        }
        if !project.entities.contains_key(parent) {
            issues.push(format!("parent '{parent}' is not an entity"));
        }
    }
    for (parent, children) in &project.hierarchy.children {
        for child in children {
            if project.hierarchy.parents.get(child) != Some(parent) {
                issues.push(format!(
                    "'{child}' listed under '{parent}' without a parent entry"
                ));
            }
        }
    }
    // Cycle scan: walking up from any node must terminate.
    for child in project.hierarchy.parents.keys() {
        let mut seen = vec![child.clone()];
        let mut current = child.clone();
        while let Some(parent) = project.hierarchy.parents.get(&current) {
            if seen.contains(parent) {
                issues.push(format!("cycle through '{parent}'"));
                break;
            }
            seen.push(parent.clone());
            current = parent.clone();
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;

    fn project_with(entities: &[&str]) -> Project {
        let mut project = Project::stub("demo", None, None);
        for slug in entities {
            project
                .entities
                .insert((*slug).to_string(), Entity::stub(slug));
        }
        project
    }

    #[test]
    fn assign_and_path() {
        let mut p = project_with(&["fleet", "wing", "hero"]);
        assign_parent(&mut p, "wing", "fleet").unwrap();
        assign_parent(&mut p, "hero", "wing").unwrap();
        assert_eq!(path_of(&p, "hero"), vec!["fleet", "wing", "hero"]);
        assert_eq!(children_of(&p, "fleet"), vec!["wing"]);
        assert!(consistency_issues(&p).is_empty());
    }

    #[test]
    fn cycle_is_refused() {
        let mut p = project_with(&["a", "b", "c"]);
        assign_parent(&mut p, "b", "a").unwrap();
        assign_parent(&mut p, "c", "b").unwrap();
        // a under c would close the loop.
        assert!(assign_parent(&mut p, "a", "c").is_err());
        assert!(assign_parent(&mut p, "a", "a").is_err());
        assert!(consistency_issues(&p).is_empty());
    }

    #[test]
    fn reassign_moves_between_parents() {
        let mut p = project_with(&["x", "y", "child"]);
        assign_parent(&mut p, "child", "x").unwrap();
        assign_parent(&mut p, "child", "y").unwrap();
        assert_eq!(children_of(&p, "x"), Vec::<String>::new());
        assert_eq!(children_of(&p, "y"), vec!["child"]);
        assert_eq!(p.hierarchy.parents.get("child"), Some(&"y".to_string()));
    }

    #[test]
    fn promote_children_on_removal() {
        let mut p = project_with(&["root", "mid", "leaf"]);
        assign_parent(&mut p, "mid", "root").unwrap();
        assign_parent(&mut p, "leaf", "mid").unwrap();

        let removed = remove_entity(&mut p, "mid", false);
        assert!(removed.is_empty());
        // leaf promoted to root level.
        assert!(p.hierarchy.parents.get("leaf").is_none());
        assert!(p.hierarchy.parents.get("mid").is_none());
        assert!(consistency_issues(&p).is_empty());
    }

    #[test]
    fn recursive_removal_returns_subtree() {
        let mut p = project_with(&["root", "mid", "leaf"]);
        assign_parent(&mut p, "mid", "root").unwrap();
        assign_parent(&mut p, "leaf", "mid").unwrap();

        let mut removed = remove_entity(&mut p, "mid", true);
        removed.sort();
        assert_eq!(removed, vec!["leaf"]);
        assert!(p.hierarchy.parents.is_empty());
        assert!(p.hierarchy.children.is_empty());
    }

    #[test]
    fn parent_path_clamps_at_unknown_segment() {
        let mut p = project_with(&["fleet", "hero"]);
        let warnings = assign_parent_path(
            &mut p,
            "hero",
            &["fleet".to_string(), "ghost".to_string()],
            DEFAULT_MAX_DEPTH,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(path_of(&p, "hero"), vec!["fleet", "hero"]);
    }

    #[test]
    fn parent_path_truncates_keeping_root_segments() {
        let mut p = project_with(&["a", "b", "c", "hero"]);
        assign_parent(&mut p, "b", "a").unwrap();
        assign_parent(&mut p, "c", "b").unwrap();
        let warnings = assign_parent_path(
            &mut p,
            "hero",
            &["a".to_string(), "b".to_string(), "c".to_string()],
            2,
        );
        assert!(warnings.iter().any(|w| w.contains("truncated")));
        // Root-most segments kept: parent is b, not c.
        assert_eq!(p.hierarchy.parents.get("hero"), Some(&"b".to_string()));
    }

    #[test]
    fn empty_resolved_path_moves_to_root() {
        let mut p = project_with(&["fleet", "hero"]);
        assign_parent(&mut p, "hero", "fleet").unwrap();
        let warnings = assign_parent_path(&mut p, "hero", &[], DEFAULT_MAX_DEPTH);
        assert!(warnings.is_empty());
        assert!(p.hierarchy.parents.get("hero").is_none());
    }
}
