// storagetool/src/storage/list.rs
use futures::stream::Stream;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::errors::AppError;
use crate::storage::migrator::StorageMigrator;
use crate::storage::model::{join_object_path, ObjectEntry};

/// Page size used when listing objects; pagination for a prefix stops when a
/// page comes back shorter than this.
pub const LIST_PAGE_LIMIT: usize = 100;

/// A listing failure scoped to one prefix. The rest of the traversal
/// continues; the caller decides whether the missing subtree is fatal.
#[derive(Debug)]
pub struct ListFailure {
    pub prefix: String,
    pub error: AppError,
}

impl std::fmt::Display for ListFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listing prefix '{}' failed: {}", self.prefix, self.error)
    }
}

/// Depth-first traversal state over a bucket's virtual directory tree.
///
/// Memory stays bounded by one page of entries plus the pending-prefix
/// stack, regardless of bucket size: leaves are yielded as they are found
/// rather than materialized up front.
struct ListWalker {
    migrator: Arc<StorageMigrator>,
    bucket: String,
    pending_prefixes: Vec<String>,
    current: Option<(String, usize)>,
    buffered: VecDeque<ObjectEntry>,
}

impl ListWalker {
    async fn next_entry(&mut self) -> Option<Result<ObjectEntry, ListFailure>> {
        loop {
            if let Some(entry) = self.buffered.pop_front() {
                return Some(Ok(entry));
            }

            let (prefix, offset) = match self.current.take() {
                Some(cursor) => cursor,
                None => match self.pending_prefixes.pop() {
                    Some(prefix) => (prefix, 0),
                    None => return None,
                },
            };

            match self
                .migrator
                .list_page(&self.bucket, &prefix, offset, LIST_PAGE_LIMIT)
                .await
            {
                Ok(items) => {
                    let full_page = items.len() == LIST_PAGE_LIMIT;
                    for mut item in items {
                        if item.is_directory() {
                            self.pending_prefixes.push(join_object_path(&prefix, &item.name));
                        } else {
                            item.full_path = join_object_path(&prefix, &item.name);
                            self.buffered.push_back(item);
                        }
                    }
                    if full_page {
                        self.current = Some((prefix, offset + LIST_PAGE_LIMIT));
                    }
                }
                Err(error) => {
                    // This prefix's subtree is abandoned; siblings already on
                    // the stack are still traversed.
                    return Some(Err(ListFailure { prefix, error }));
                }
            }
        }
    }
}

/// Recursively lists all leaf objects under `prefix` in `bucket`, yielding
/// each exactly once with its bucket-relative `full_path` filled in.
///
/// Directory markers (entries without an id) are traversed depth-first and
/// never yielded. Each call restarts the traversal from the remote state.
pub fn list_objects(
    migrator: Arc<StorageMigrator>,
    bucket: &str,
    prefix: &str,
) -> impl Stream<Item = Result<ObjectEntry, ListFailure>> {
    let walker = ListWalker {
        migrator,
        bucket: bucket.to_string(),
        pending_prefixes: vec![prefix.to_string()],
        current: None,
        buffered: VecDeque::new(),
    };
    futures::stream::unfold(walker, |mut walker| async move {
        walker.next_entry().await.map(|item| (item, walker))
    })
}
