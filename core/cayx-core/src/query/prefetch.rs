//! 프리페치 트리
//!
//! Joint 프리페치는 루트 쿼리에 LEFT JOIN 으로 합쳐지고, Disjoint 프리페치는
//! 루트 결과를 받은 뒤 관계 쿼리를 한 번 더 실행합니다.

/// How a prefetched relationship is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefetchSemantics {
    /// Same SQL statement as the root query
    Joint,
    /// Separate query per prefetch path
    Disjoint,
}

/// 프리페치 경로 트리의 노드
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrefetchTreeNode {
    pub name: String,
    /// `None` for intermediate nodes created only to reach a deeper path
    pub semantics: Option<PrefetchSemantics>,
    pub children: Vec<PrefetchTreeNode>,
}

impl PrefetchTreeNode {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Adds a dot-separated path, creating intermediate (phantom) nodes.
    pub fn add_path(&mut self, path: &str, semantics: PrefetchSemantics) {
        let mut node = self;
        for name in path.split('.') {
            let idx = match node.children.iter().position(|c| c.name == name) {
                Some(i) => i,
                None => {
                    node.children.push(PrefetchTreeNode {
                        name: name.to_string(),
                        semantics: None,
                        children: Vec::new(),
                    });
                    node.children.len() - 1
                }
            };
            node = &mut node.children[idx];
        }
        node.semantics = Some(semantics);
    }

    /// Full paths of all non-phantom nodes with the given semantics, parents first.
    pub fn paths(&self, semantics: PrefetchSemantics) -> Vec<String> {
        let mut out = Vec::new();
        self.collect("", semantics, &mut out);
        out
    }

    fn collect(&self, prefix: &str, semantics: PrefetchSemantics, out: &mut Vec<String>) {
        for child in &self.children {
            let path = if prefix.is_empty() {
                child.name.clone()
            } else {
                format!("{prefix}.{}", child.name)
            };
            if child.semantics == Some(semantics) {
                out.push(path.clone());
            }
            child.collect(&path, semantics, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_by_semantics() {
        let mut root = PrefetchTreeNode::root();
        root.add_path("paintingArray.toGallery", PrefetchSemantics::Joint);
        root.add_path("paintingArray", PrefetchSemantics::Disjoint);
        root.add_path("artistExhibitArray", PrefetchSemantics::Joint);

        assert_eq!(
            root.paths(PrefetchSemantics::Joint),
            vec!["paintingArray.toGallery".to_string(), "artistExhibitArray".to_string()]
        );
        assert_eq!(root.paths(PrefetchSemantics::Disjoint), vec!["paintingArray".to_string()]);
        assert_eq!(root.children.len(), 2);
    }
}
