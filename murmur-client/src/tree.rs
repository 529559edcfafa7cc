use std::collections::HashMap;

use anyhow::Context;

use crate::{
    api::{Comment, CommentId, CommentTree, CommentTreeNode, Subject, UserId},
    Comments, Error,
};

impl Comments {
    /// Loads the two-level thread of `subject`, annotated with `viewer`'s votes.
    ///
    /// Costs three store round trips whatever the size of the thread.
    pub async fn build_tree(
        &self,
        subject: &Subject,
        viewer: Option<UserId>,
    ) -> Result<CommentTree, Error> {
        let top = self
            .store
            .list_top_level(subject)
            .await
            .with_context(|| format!("listing top-level comments of {subject}"))?;
        if top.is_empty() {
            return Ok(CommentTree::default());
        }

        let top_ids = top.iter().map(|c| c.id).collect::<Vec<_>>();
        let mut replies: HashMap<CommentId, Vec<Comment>> = HashMap::new();
        for r in self
            .store
            .list_replies_of(&top_ids)
            .await
            .with_context(|| format!("listing replies in {subject}"))?
        {
            if let Some(parent) = r.parent_id {
                replies.entry(parent).or_default().push(r);
            }
        }
        for rs in replies.values_mut() {
            rs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }

        let votes = match viewer {
            None => HashMap::new(),
            Some(user) => {
                let all_ids = top_ids
                    .iter()
                    .copied()
                    .chain(replies.values().flatten().map(|r| r.id))
                    .collect::<Vec<_>>();
                self.store
                    .get_votes_for_user(&all_ids, user)
                    .await
                    .with_context(|| format!("fetching votes of {user:?} in {subject}"))?
            }
        };

        let roots = top
            .into_iter()
            .map(|c| {
                let replies = replies
                    .remove(&c.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|r| {
                        let vote = votes.get(&r.id).copied();
                        CommentTreeNode::leaf(r, vote)
                    })
                    .collect();
                CommentTreeNode {
                    user_vote: votes.get(&c.id).copied(),
                    comment: c,
                    replies,
                }
            })
            .collect::<Vec<_>>();
        tracing::debug!(%subject, roots = roots.len(), "built comment tree");
        Ok(CommentTree { roots })
    }
}
