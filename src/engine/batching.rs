//! Splitting asset ids into signing chunks and transaction batches

use crate::chain::AssetId;

/// Assets approved by one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Chunk this batch belongs to
    pub chunk: usize,
    /// Position within the chunk; stable across rebuilds
    pub index: usize,
    pub asset_ids: Vec<AssetId>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.asset_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asset_ids.is_empty()
    }
}

/// Assets covered by one signing request per attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub batches: Vec<Batch>,
}

impl Chunk {
    pub fn asset_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    pub fn asset_ids(&self) -> impl Iterator<Item = &AssetId> {
        self.batches.iter().flat_map(|b| b.asset_ids.iter())
    }
}

/// Split `asset_ids` into chunks of at most `chunk_size`, each split into batches
/// of at most `batch_size`. Input order is kept at both levels.
pub fn plan_chunks(asset_ids: &[AssetId], chunk_size: usize, batch_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let batch_size = batch_size.max(1);

    asset_ids
        .chunks(chunk_size)
        .enumerate()
        .map(|(chunk_index, chunk)| Chunk {
            index: chunk_index,
            batches: chunk
                .chunks(batch_size)
                .enumerate()
                .map(|(index, assets)| Batch {
                    chunk: chunk_index,
                    index,
                    asset_ids: assets.to_vec(),
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;

    fn assets(n: usize) -> Vec<AssetId> {
        (0..n).map(|_| AssetId::new(Pubkey::new_unique())).collect()
    }

    #[test]
    fn test_small_input_is_one_batch() {
        let chunks = plan_chunks(&assets(15), 1000, 20);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].batches.len(), 1);
        assert_eq!(chunks[0].batches[0].len(), 15);
    }

    #[test]
    fn test_batches_are_filled_in_order() {
        let input = assets(45);
        let chunks = plan_chunks(&input, 1000, 20);
        let sizes: Vec<_> = chunks[0].batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);

        let flattened: Vec<_> = chunks[0].asset_ids().copied().collect();
        assert_eq!(flattened, input);
    }

    #[test]
    fn test_chunks_split_at_chunk_size() {
        let chunks = plan_chunks(&assets(1500), 1000, 20);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].asset_count(), 1000);
        assert_eq!(chunks[0].batches.len(), 50);
        assert_eq!(chunks[1].asset_count(), 500);
        assert_eq!(chunks[1].batches.len(), 25);
        assert!(chunks[1].batches.iter().all(|b| b.chunk == 1));
    }

    #[test]
    fn test_batch_size_bound_holds_for_uneven_sizes() {
        for n in [0, 1, 19, 20, 21, 999, 1001, 2047] {
            let input = assets(n);
            let chunks = plan_chunks(&input, 100, 7);
            assert!(chunks.iter().all(|c| c.asset_count() <= 100));
            assert!(chunks.iter().flat_map(|c| &c.batches).all(|b| !b.is_empty() && b.len() <= 7));
            assert_eq!(chunks.iter().map(Chunk::asset_count).sum::<usize>(), n);
        }
    }

    #[test]
    fn test_empty_input_has_no_chunks() {
        assert!(plan_chunks(&[], 1000, 20).is_empty());
    }
}
