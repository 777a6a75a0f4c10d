//! Static work partitioning

/// Split `items` into exactly `workers` lists, assigning item `k` to list
/// `k % workers`. Order within each list follows the input order.
///
/// With `workers == 0` there is nowhere to put anything and the result is
/// empty; callers validate the worker count first.
pub fn round_robin<T>(items: impl IntoIterator<Item = T>, workers: usize) -> Vec<Vec<T>> {
    let mut partitions: Vec<Vec<T>> = (0..workers).map(|_| Vec::new()).collect();
    if workers == 0 {
        return partitions;
    }
    for (index, item) in items.into_iter().enumerate() {
        partitions[index % workers].push(item);
    }
    partitions
}
