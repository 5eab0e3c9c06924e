/// A binary indexed tree over segment counts.
///
/// Supports O(log n) prefix sums, point updates, and positional descent. The
/// tree is rebuilt wholesale whenever the segment list changes length;
/// plain inserts use point updates.
#[derive(Debug, Clone)]
pub struct Fenwick {
    /// 1-indexed internal array; slot 0 is unused.
    tree: Vec<usize>,
}

impl Fenwick {
    /// Build the tree from segment counts using the canonical linear
    /// construction: seed each node with its own count, then push the
    /// partial sum into the next node up.
    pub fn from_counts(counts: &[usize]) -> Self {
        let n = counts.len();
        let mut tree = vec![0usize; n + 1];
        for (i, &count) in counts.iter().enumerate() {
            let i = i + 1;
            tree[i] += count;
            let parent = i + lowest_bit(i);
            if parent <= n {
                tree[parent] += tree[i];
            }
        }
        Self { tree }
    }

    /// Number of segments covered.
    pub fn len(&self) -> usize {
        self.tree.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of elements in segments `[0, k)`.
    pub fn prefix_sum(&self, k: usize) -> usize {
        let mut k = k.min(self.len());
        let mut sum = 0;
        while k > 0 {
            sum += self.tree[k];
            k -= lowest_bit(k);
        }
        sum
    }

    /// Total element count across all segments.
    pub fn total(&self) -> usize {
        self.prefix_sum(self.len())
    }

    /// Add `delta` to the count of segment `k`.
    pub fn point_add(&mut self, k: usize, delta: isize) {
        let n = self.len();
        let mut i = k + 1;
        while i <= n {
            self.tree[i] = (self.tree[i] as isize + delta) as usize;
            i += lowest_bit(i);
        }
    }

    /// Resolve global position `i` to `(segment index, local offset)`.
    ///
    /// Descends from the greatest power of two not exceeding the tree
    /// length, including a bin whenever the cumulative sum stays at or
    /// below `i`. For `i` equal to the total count the returned segment
    /// index equals the segment list length (one past the end); callers
    /// treat that as an append.
    pub fn locate(&self, i: usize) -> (usize, usize) {
        let n = self.len();
        let mut pos = 0;
        let mut remaining = i;
        let mut bit = if n == 0 { 0 } else { highest_power_of_two(n) };
        while bit > 0 {
            let next = pos + bit;
            if next <= n && self.tree[next] <= remaining {
                pos = next;
                remaining -= self.tree[next];
            }
            bit >>= 1;
        }
        (pos, remaining)
    }
}

fn lowest_bit(i: usize) -> usize {
    i & i.wrapping_neg()
}

fn highest_power_of_two(n: usize) -> usize {
    let mut bit = 1;
    while bit * 2 <= n {
        bit *= 2;
    }
    bit
}
