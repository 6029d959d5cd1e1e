// service/graph.rs
//! In-memory view of a slice of the referral tree.
//!
//! The store hands over every edge a request needs in bulk (the user's own
//! edge, its ancestor edges, the whole subtree below it) and all traversal
//! happens here. Walks track visited users, so they terminate on any input.
use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::models::{
    referralmodel::{DescendantNode, LineageUpdate, ReferralEdge, ReferralTree},
    usermodel::UserProfile,
};

#[derive(Debug, Default)]
pub struct ReferralGraph {
    edges: HashMap<Uuid, ReferralEdge>,
    by_referee: HashMap<Uuid, Uuid>,
    children: HashMap<Uuid, Vec<Uuid>>,
    profiles: HashMap<Uuid, UserProfile>,
}

impl ReferralGraph {
    pub fn new<E, P>(edges: E, profiles: P) -> Self
    where
        E: IntoIterator<Item = ReferralEdge>,
        P: IntoIterator<Item = UserProfile>,
    {
        let mut graph = ReferralGraph::default();

        let mut edges: Vec<ReferralEdge> = edges.into_iter().collect();
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        for edge in edges {
            if graph.edges.contains_key(&edge.id) {
                continue;
            }
            graph.by_referee.insert(edge.referee_id, edge.id);
            graph.children.entry(edge.referrer_id).or_default().push(edge.id);
            graph.edges.insert(edge.id, edge);
        }

        graph.profiles = profiles.into_iter().map(|p| (p.id, p)).collect();
        graph
    }

    pub fn edge_for_referee(&self, referee_id: Uuid) -> Option<&ReferralEdge> {
        self.by_referee.get(&referee_id).and_then(|id| self.edges.get(id))
    }

    /// The upward chain above `user_id`, most distant ancestor first and the
    /// immediate referrer last. Empty for a root user.
    pub fn ancestors(&self, user_id: Uuid) -> Vec<UserProfile> {
        let Some(own_edge) = self.edge_for_referee(user_id) else {
            return Vec::new();
        };

        let mut chain = Vec::with_capacity(own_edge.ancestors.len() + 1);

        for ancestor_id in &own_edge.ancestors {
            let profile = self
                .edges
                .get(ancestor_id)
                .and_then(|edge| self.profiles.get(&edge.referrer_id));

            match profile {
                Some(profile) => chain.push(profile.clone()),
                None => tracing::warn!(
                    "Ancestor referral {} of user {} could not be resolved. Skipping.",
                    ancestor_id,
                    user_id
                ),
            }
        }

        match self.profiles.get(&own_edge.referrer_id) {
            Some(referrer) => chain.push(referrer.clone()),
            None => tracing::warn!(
                "Referrer {} of user {} no longer exists. Skipping.",
                own_edge.referrer_id,
                user_id
            ),
        }

        chain
    }

    /// The downward tree below `user_id`. Branches whose referee record is
    /// gone are logged and left out; each user appears at most once.
    pub fn descendants(&self, user_id: Uuid) -> Vec<DescendantNode> {
        let mut visited: HashSet<Uuid> = HashSet::from([user_id]);

        // Pre-order walk with an explicit stack, remembering each accepted
        // node's parent slot.
        let mut order: Vec<(DescendantNode, Option<usize>)> = Vec::new();
        let mut stack: Vec<(Uuid, Option<usize>)> = self
            .children_of(user_id)
            .rev()
            .map(|edge_id| (edge_id, None))
            .collect();

        while let Some((edge_id, parent)) = stack.pop() {
            let Some(edge) = self.edges.get(&edge_id) else {
                continue;
            };

            if !visited.insert(edge.referee_id) {
                tracing::warn!(
                    "Referral {} revisits user {}. Skipping.",
                    edge.id,
                    edge.referee_id
                );
                continue;
            }

            let Some(referee) = self.profiles.get(&edge.referee_id) else {
                tracing::warn!("Referral {} has a missing referee. Skipping.", edge.id);
                continue;
            };

            let slot = order.len();
            order.push((
                DescendantNode {
                    id: referee.id,
                    full_name: referee.full_name.clone(),
                    email: referee.email.clone(),
                    level: edge.level,
                    commission: edge.base_amount,
                    referrals: Vec::new(),
                },
                parent,
            ));

            stack.extend(
                self.children_of(edge.referee_id)
                    .rev()
                    .map(|child| (child, Some(slot))),
            );
        }

        // Every node comes after its parent, so folding from the back hands
        // each finished subtree to its parent.
        let mut roots = Vec::new();
        let mut slots: Vec<Option<DescendantNode>> = Vec::with_capacity(order.len());
        let mut parents = Vec::with_capacity(order.len());
        for (node, parent) in order {
            slots.push(Some(node));
            parents.push(parent);
        }

        for index in (0..slots.len()).rev() {
            let Some(mut node) = slots[index].take() else {
                continue;
            };
            node.referrals.reverse();

            match parents[index] {
                Some(parent) => {
                    if let Some(parent_node) = slots[parent].as_mut() {
                        parent_node.referrals.push(node);
                    }
                }
                None => roots.push(node),
            }
        }

        roots.reverse();
        roots
    }

    pub fn tree(&self, user: UserProfile) -> ReferralTree {
        ReferralTree {
            ancestors: self.ancestors(user.id),
            descendants: self.descendants(user.id),
            user,
        }
    }

    /// True when `user_id` is `root` or sits somewhere below it.
    pub fn reaches(&self, root: Uuid, user_id: Uuid) -> bool {
        if root == user_id {
            return true;
        }

        let mut visited = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);

        while let Some(current) = queue.pop_front() {
            for edge_id in self.children_of(current) {
                if let Some(edge) = self.edges.get(&edge_id) {
                    if edge.referee_id == user_id {
                        return true;
                    }
                    if visited.insert(edge.referee_id) {
                        queue.push_back(edge.referee_id);
                    }
                }
            }
        }

        false
    }

    /// New positions for every edge below `moved`, given the position the
    /// moved edge is about to take. Parents are always emitted before their
    /// children.
    pub fn relineage(&self, moved: &LineageUpdate, referee_id: Uuid) -> Vec<LineageUpdate> {
        let mut updates = Vec::new();
        let mut visited = HashSet::from([referee_id]);
        let mut queue: VecDeque<(Uuid, i32, Vec<Uuid>)> = VecDeque::from([(
            referee_id,
            moved.level,
            lineage_through(&moved.ancestors, moved.referral_id),
        )]);

        while let Some((referrer_id, parent_level, ancestors)) = queue.pop_front() {
            for edge_id in self.children_of(referrer_id) {
                let Some(edge) = self.edges.get(&edge_id) else {
                    continue;
                };
                if !visited.insert(edge.referee_id) {
                    continue;
                }

                let update = LineageUpdate {
                    referral_id: edge.id,
                    referrer_id: edge.referrer_id,
                    level: parent_level + 1,
                    ancestors: ancestors.clone(),
                };
                queue.push_back((
                    edge.referee_id,
                    update.level,
                    lineage_through(&update.ancestors, edge.id),
                ));
                updates.push(update);
            }
        }

        updates
    }

    fn children_of(&self, referrer_id: Uuid) -> impl DoubleEndedIterator<Item = Uuid> + '_ {
        self.children
            .get(&referrer_id)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
            .iter()
            .copied()
    }
}

/// Every user id the edges mention, without duplicates.
pub fn user_ids_of(edges: &[ReferralEdge]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    edges
        .iter()
        .flat_map(|e| [e.referrer_id, e.referee_id])
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Ancestor list for an edge whose parent edge is `parent_id`.
pub fn lineage_through(parent_ancestors: &[Uuid], parent_id: Uuid) -> Vec<Uuid> {
    let mut ancestors = Vec::with_capacity(parent_ancestors.len() + 1);
    ancestors.extend_from_slice(parent_ancestors);
    ancestors.push(parent_id);
    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::referralmodel::ReferralStatus;
    use chrono::{Duration, Utc};

    struct Fixture {
        edges: Vec<ReferralEdge>,
        profiles: Vec<UserProfile>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture { edges: Vec::new(), profiles: Vec::new() }
        }

        fn user(&mut self, name: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.profiles.push(UserProfile {
                id,
                full_name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
            });
            id
        }

        /// Links `referee` under `referrer`, deriving level/ancestors from the
        /// referrer's own edge.
        fn refer(&mut self, referrer: Uuid, referee: Uuid) -> Uuid {
            let (level, ancestors) = match self.edges.iter().find(|e| e.referee_id == referrer) {
                Some(parent) => (parent.level + 1, lineage_through(&parent.ancestors, parent.id)),
                None => (1, Vec::new()),
            };
            let id = Uuid::new_v4();
            let at = Utc::now() + Duration::milliseconds(self.edges.len() as i64);
            self.edges.push(ReferralEdge {
                id,
                referrer_id: referrer,
                referee_id: referee,
                referral_code: "CODE".to_string(),
                level,
                ancestors,
                base_amount: 1_000 * i64::from(level),
                earned_balance: 0,
                status: ReferralStatus::Initiated,
                created_at: at,
                updated_at: at,
            });
            id
        }

        fn graph(&self) -> ReferralGraph {
            ReferralGraph::new(self.edges.clone(), self.profiles.clone())
        }
    }

    fn names(nodes: &[DescendantNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.full_name.as_str()).collect()
    }

    fn count(nodes: &[DescendantNode]) -> usize {
        nodes.iter().map(|n| 1 + count(&n.referrals)).sum()
    }

    #[test]
    fn ancestors_run_from_root_to_parent() {
        let mut f = Fixture::new();
        let root = f.user("Root");
        let mid = f.user("Mid");
        let parent = f.user("Parent");
        let leaf = f.user("Leaf");
        f.refer(root, mid);
        f.refer(mid, parent);
        f.refer(parent, leaf);

        let graph = f.graph();
        let chain: Vec<String> = graph.ancestors(leaf).into_iter().map(|p| p.full_name).collect();

        assert_eq!(chain, vec!["Root", "Mid", "Parent"]);
        assert!(graph.ancestors(root).is_empty());
    }

    #[test]
    fn descendants_nest_by_referrer() {
        let mut f = Fixture::new();
        let root = f.user("Root");
        let a = f.user("A");
        let b = f.user("B");
        let a1 = f.user("A1");
        f.refer(root, a);
        f.refer(root, b);
        f.refer(a, a1);

        let tree = f.graph().descendants(root);

        assert_eq!(names(&tree), vec!["A", "B"]);
        assert_eq!(names(&tree[0].referrals), vec!["A1"]);
        assert_eq!(tree[0].referrals[0].level, 2);
        assert_eq!(tree[0].referrals[0].commission, 2_000);
        assert!(tree[1].referrals.is_empty());
    }

    #[test]
    fn descendants_contain_every_reachable_user_once() {
        let mut f = Fixture::new();
        let root = f.user("Root");
        let mut frontier = vec![root];
        for depth in 0..4 {
            let mut next = Vec::new();
            for parent in &frontier {
                for i in 0..2 {
                    let child = f.user(&format!("U{}-{}", depth, i));
                    f.refer(*parent, child);
                    next.push(child);
                }
            }
            frontier = next;
        }

        let tree = f.graph().descendants(root);
        assert_eq!(count(&tree), 2 + 4 + 8 + 16);
    }

    #[test]
    fn missing_referee_branch_is_omitted() {
        let mut f = Fixture::new();
        let root = f.user("Root");
        let kept = f.user("Kept");
        let gone = f.user("Gone");
        let below_gone = f.user("BelowGone");
        f.refer(root, kept);
        f.refer(root, gone);
        f.refer(gone, below_gone);
        f.profiles.retain(|p| p.id != gone);

        let tree = f.graph().descendants(root);
        assert_eq!(names(&tree), vec!["Kept"]);
    }

    #[test]
    fn cyclic_edges_terminate() {
        let mut f = Fixture::new();
        let a = f.user("A");
        let b = f.user("B");
        f.refer(a, b);
        f.refer(b, a);

        let tree = f.graph().descendants(a);
        assert_eq!(names(&tree), vec!["B"]);
        assert!(tree[0].referrals.is_empty());
    }

    #[test]
    fn long_chain_is_fully_walked() {
        let mut f = Fixture::new();
        let mut parent = f.user("U0");
        let root = parent;
        for i in 1..1_000 {
            let child = f.user(&format!("U{}", i));
            f.refer(parent, child);
            parent = child;
        }

        let graph = f.graph();
        let tree = graph.descendants(root);
        assert_eq!(count(&tree), 999);
        assert_eq!(graph.ancestors(parent).len(), 999);
    }

    #[test]
    fn reaches_follows_the_subtree_only() {
        let mut f = Fixture::new();
        let root = f.user("Root");
        let a = f.user("A");
        let b = f.user("B");
        let outsider = f.user("Outsider");
        f.refer(root, a);
        f.refer(a, b);

        let graph = f.graph();
        assert!(graph.reaches(root, b));
        assert!(graph.reaches(a, a));
        assert!(!graph.reaches(a, root));
        assert!(!graph.reaches(root, outsider));
    }

    #[test]
    fn relineage_rewrites_the_whole_subtree() {
        let mut f = Fixture::new();
        let root = f.user("Root");
        let a = f.user("A");
        let b = f.user("B");
        let c = f.user("C");
        f.refer(root, a);
        let ab = f.refer(a, b);
        let bc = f.refer(b, c);

        let moved = LineageUpdate {
            referral_id: ab,
            referrer_id: root,
            level: 4,
            ancestors: vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()],
        };
        let updates = f.graph().relineage(&moved, b);

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].referral_id, bc);
        assert_eq!(updates[0].level, 5);
        assert_eq!(updates[0].ancestors, lineage_through(&moved.ancestors, ab));
        assert_eq!(updates[0].ancestors.len() as i32, updates[0].level - 1);
    }
}
