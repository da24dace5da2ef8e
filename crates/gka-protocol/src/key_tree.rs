//! Chained key tree.
//!
//! Each node holds the group secret after one more member joined (`root`)
//! and that member's contribution (`leaf`). The head is always the newest
//! node; older nodes hang off `next` and are never touched again.
use crate::crypto::{KeyExchange, PublicValue, Secret};
use crate::GkaError;

pub struct KeyTreeNode {
    root_secret: Secret,
    /// Only computed when this member has to publish it (as sponsor).
    root_public: Option<PublicValue>,
    leaf_secret: Option<Secret>,
    leaf_public: PublicValue,
    next: Option<Box<KeyTreeNode>>,
}

impl KeyTreeNode {
    pub fn root_secret(&self) -> &Secret {
        &self.root_secret
    }

    pub fn root_public(&self) -> Option<&PublicValue> {
        self.root_public.as_ref()
    }

    pub fn leaf_secret(&self) -> Option<&Secret> {
        self.leaf_secret.as_ref()
    }

    pub fn leaf_public(&self) -> &PublicValue {
        &self.leaf_public
    }

    pub fn next(&self) -> Option<&KeyTreeNode> {
        self.next.as_deref()
    }
}

impl std::fmt::Debug for KeyTreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyTreeNode")
            .field("root_secret", &self.root_secret)
            .field("leaf_public", &self.leaf_public)
            .field("has_next", &self.next.is_some())
            .finish()
    }
}

/// Owner of a chain of [`KeyTreeNode`]s.
#[derive(Debug)]
pub struct KeyTree {
    head: Box<KeyTreeNode>,
    len: usize,
}

impl KeyTree {
    /// A detached single-node tree.
    pub fn build(
        root_secret: Secret,
        root_public: Option<PublicValue>,
        leaf_secret: Option<Secret>,
        leaf_public: PublicValue,
    ) -> Self {
        Self {
            head: Box::new(KeyTreeNode {
                root_secret,
                root_public,
                leaf_secret,
                leaf_public,
                next: None,
            }),
            len: 1,
        }
    }

    /// Prepend a node for `incoming`:
    /// `root' = agree(head.root_secret, incoming)`.
    ///
    /// When `publish` is set the new root public value is computed too.
    /// On error the tree is left unchanged.
    pub fn extend(
        &mut self,
        incoming: &PublicValue,
        kx: &dyn KeyExchange,
        publish: bool,
    ) -> Result<(), GkaError> {
        let root_secret = kx.agree(&self.head.root_secret, incoming)?;
        let root_public = if publish {
            Some(kx.public_of(&root_secret)?)
        } else {
            None
        };

        let mut previous = Box::new(KeyTreeNode {
            root_secret,
            root_public,
            leaf_secret: None,
            leaf_public: incoming.clone(),
            next: None,
        });
        std::mem::swap(&mut self.head, &mut previous);
        self.head.next = Some(previous);
        self.len += 1;
        Ok(())
    }

    pub fn head(&self) -> &KeyTreeNode {
        &self.head
    }

    /// The group secret as currently known.
    pub fn root_secret(&self) -> &Secret {
        &self.head.root_secret
    }

    /// Public value of the current root, derived on demand when the head
    /// did not store one.
    pub fn root_public(&self, kx: &dyn KeyExchange) -> Result<PublicValue, GkaError> {
        match &self.head.root_public {
            Some(public) => Ok(public.clone()),
            None => kx.public_of(&self.head.root_secret),
        }
    }

    /// Number of nodes, equal to the number of keys computed.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Nodes from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &KeyTreeNode> {
        std::iter::successors(Some(self.head.as_ref()), |node| node.next())
    }
}

impl Drop for KeyTree {
    // Unlink iteratively so long chains cannot overflow the stack.
    fn drop(&mut self) {
        let mut next = self.head.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}
