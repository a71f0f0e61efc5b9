use std::{borrow::Cow, cmp::Ordering, collections::HashMap};

use crate::types::{TimelineDiff, TimelineMessage};

/// Keys the reconciler derives from an otherwise opaque timeline payload.
pub trait TimelineKeys {
    /// Engine-assigned positional id. May migrate between diffs.
    fn item_id(&self) -> &str;

    /// Content identity, unique within one conversation's sequence.
    fn stable_id(&self) -> Cow<'_, str>;

    /// Primary ordering key for entries whose position is not dictated.
    fn timestamp(&self) -> i64;

    /// Secondary ordering key for equal timestamps.
    fn tiebreak(&self) -> Cow<'_, str> {
        self.stable_id()
    }

    /// Whether this entry's stable id equals `stable_id`.
    ///
    /// Called once per entry on every upsert; override when `stable_id`
    /// allocates.
    fn has_stable_id(&self, stable_id: &str) -> bool {
        self.stable_id() == stable_id
    }

    /// Compare tie-break keys; must agree with comparing [`Self::tiebreak`].
    fn cmp_tiebreak(&self, other: &Self) -> Ordering {
        self.tiebreak().cmp(&other.tiebreak())
    }
}

impl TimelineKeys for TimelineMessage {
    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn stable_id(&self) -> Cow<'_, str> {
        Cow::Owned(self.stable_key())
    }

    fn timestamp(&self) -> i64 {
        self.timestamp_ms
    }

    fn has_stable_id(&self, stable_id: &str) -> bool {
        self.stable_key_ref().matches(stable_id)
    }

    fn cmp_tiebreak(&self, other: &Self) -> Ordering {
        self.stable_key_ref().cmp(&other.stable_key_ref())
    }
}

/// Result of folding one diff into a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineApply<T> {
    /// The next sequence in display order.
    pub items: Vec<T>,
    /// Entries the diff touched: folded items, or removed entries for a remove.
    pub delta: Vec<T>,
    /// Set when the sequence was replaced wholesale.
    pub reset: bool,
    /// Set when the engine sent `Clear`. The sequence is left untouched.
    pub cleared: bool,
}

impl<T> TimelineApply<T> {
    fn unchanged(items: Vec<T>) -> Self {
        Self {
            items,
            delta: Vec::new(),
            reset: false,
            cleared: false,
        }
    }
}

/// Fold one diff into `current`.
///
/// Only `Reset` dictates exact order. Every other insert goes through
/// [`upsert`], so `Append`/`Prepend` are placement hints rather than
/// positions. Malformed input (for example removing an unknown item id) is a
/// no-op with an empty delta.
pub fn apply<T>(current: Vec<T>, diff: TimelineDiff<T>) -> TimelineApply<T>
where
    T: TimelineKeys + Clone,
{
    match diff {
        TimelineDiff::Reset(items) => {
            let items = dedup_by_stable_id(items);
            TimelineApply {
                delta: items.clone(),
                items,
                reset: true,
                cleared: false,
            }
        }
        TimelineDiff::Clear => TimelineApply {
            cleared: true,
            ..TimelineApply::unchanged(current)
        },
        TimelineDiff::Append(items) => fold_upserts(current, items),
        TimelineDiff::Prepend(item)
        | TimelineDiff::UpdateByItemId(item)
        | TimelineDiff::UpsertByItemId(item) => fold_upserts(current, vec![item]),
        TimelineDiff::RemoveByItemId(item_id) => {
            let (delta, items): (Vec<T>, Vec<T>) = current
                .into_iter()
                .partition(|entry| entry.item_id() == item_id);
            TimelineApply {
                items,
                delta,
                reset: false,
                cleared: false,
            }
        }
    }
}

/// Insert or replace a single entry.
///
/// Lookup goes by item id first. When the stable id also matches a different
/// entry, the identity migrated: `item` lands at the lower of the two
/// positions and the other entry is dropped. Without an item id match the
/// stable id is tried, and a genuinely new entry is spliced in at its sorted
/// position.
pub fn upsert<T: TimelineKeys>(items: &mut Vec<T>, item: T) {
    let by_item_id = items
        .iter()
        .position(|entry| entry.item_id() == item.item_id());
    let stable_id = item.stable_id().into_owned();
    let by_stable_id = items
        .iter()
        .position(|entry| entry.has_stable_id(&stable_id));

    match (by_item_id, by_stable_id) {
        (Some(i), Some(j)) if i != j => {
            let (keep, drop) = (i.min(j), i.max(j));
            items[keep] = item;
            items.remove(drop);
        }
        (Some(i), _) => items[i] = item,
        (None, Some(k)) => items[k] = item,
        (None, None) => {
            let at = insertion_point(items, &item);
            items.insert(at, item);
        }
    }
}

/// Order by `(timestamp, tiebreak)` ascending.
pub fn compare_entries<T: TimelineKeys>(a: &T, b: &T) -> Ordering {
    a.timestamp()
        .cmp(&b.timestamp())
        .then_with(|| a.cmp_tiebreak(b))
}

/// First index whose entry sorts strictly after `item`.
///
/// This is a plain binary search over the current array. A sequence laid out
/// by `Reset` in non-chronological order is searched as-is.
pub fn insertion_point<T: TimelineKeys>(items: &[T], item: &T) -> usize {
    let mut lo = 0;
    let mut hi = items.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if compare_entries(&items[mid], item) == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

fn fold_upserts<T>(mut items: Vec<T>, incoming: Vec<T>) -> TimelineApply<T>
where
    T: TimelineKeys + Clone,
{
    for item in &incoming {
        upsert(&mut items, item.clone());
    }
    TimelineApply {
        items,
        delta: incoming,
        reset: false,
        cleared: false,
    }
}

// First occurrence fixes the position, the last occurrence wins the slot.
fn dedup_by_stable_id<T: TimelineKeys>(items: Vec<T>) -> Vec<T> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let key = item.stable_id().into_owned();
        match slots.get(&key) {
            Some(&slot) => out[slot] = item,
            None => {
                slots.insert(key, out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Changes reported by [`TimelineBuffer::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineChange<T> {
    /// Entries the diff touched.
    pub delta: Vec<T>,
    /// Set when the buffer took a new snapshot.
    pub reset: bool,
    /// Set when the engine sent `Clear`.
    pub cleared: bool,
}

impl<T> Default for TimelineChange<T> {
    fn default() -> Self {
        Self {
            delta: Vec::new(),
            reset: false,
            cleared: false,
        }
    }
}

/// Timeline sequence owned by one conversation subscriber.
///
/// Wraps [`apply`] and ignores an empty `Reset` while a non-empty snapshot is
/// held; engines emit those transiently while reconnecting.
#[derive(Debug, Clone)]
pub struct TimelineBuffer<T> {
    items: Vec<T>,
    has_snapshot: bool,
}

impl<T> Default for TimelineBuffer<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            has_snapshot: false,
        }
    }
}

impl<T: TimelineKeys + Clone> TimelineBuffer<T> {
    /// Create an empty buffer that has not received a snapshot yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entries in display order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether at least one `Reset` has been applied.
    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    /// Fold one diff into the buffer.
    pub fn apply(&mut self, diff: TimelineDiff<T>) -> TimelineChange<T> {
        if let TimelineDiff::Reset(items) = &diff
            && items.is_empty()
            && !self.items.is_empty()
        {
            return TimelineChange::default();
        }

        let current = std::mem::take(&mut self.items);
        let outcome = apply(current, diff);
        self.items = outcome.items;
        if outcome.reset {
            self.has_snapshot = true;
        }

        TimelineChange {
            delta: outcome.delta,
            reset: outcome.reset,
            cleared: outcome.cleared,
        }
    }

    /// Consume the buffer and return its entries.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl TimelineBuffer<TimelineMessage> {
    /// Main-timeline view: thread replies are left to thread views.
    pub fn without_thread_replies(&self) -> Vec<TimelineMessage> {
        self.items
            .iter()
            .filter(|message| !message.is_thread_reply())
            .cloned()
            .collect()
    }
}
