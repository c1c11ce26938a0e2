/// Canonical conversation id for an unordered pair of users: the two ids in
/// byte order joined by `_`.
///
/// `_` may also occur inside user ids, so the result cannot be split back
/// into participants. Stored rows keep sender and receiver for that.
pub fn resolve(user_a: &str, user_b: &str) -> String {
    let (first, second) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    let mut id = String::with_capacity(first.len() + second.len() + 1);
    id.push_str(first);
    id.push('_');
    id.push_str(second);
    id
}
