use super::str;

pub fn to_str(buf: &[u8]) -> String {
    let mut s = String::with_capacity(buf.len());
    for b in buf {
        s.push(char::from(*b));
    }
    s
}

pub fn to_bin(s: &str) -> Vec<u8> {
    s.chars().map(|c| c as u32 as u8).collect()
}

pub fn diff(src: &[u8], dst: &[u8]) -> str::Patch {
    str::diff(&to_str(src), &to_str(dst))
}

pub fn apply<FIns, FDel>(
    patch: &str::Patch,
    src_len: usize,
    mut on_insert: FIns,
    mut on_delete: FDel,
) where
    FIns: FnMut(usize, Vec<u8>),
    FDel: FnMut(usize, usize),
{
    str::apply(
        patch,
        src_len,
        |pos, s| on_insert(pos, to_bin(s)),
        |pos, len, _| on_delete(pos, len),
    );
}

pub fn src(patch: &str::Patch) -> Vec<u8> {
    to_bin(&str::src(patch))
}

pub fn dst(patch: &str::Patch) -> Vec<u8> {
    to_bin(&str::dst(patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bin_and_to_str_round_trip_byte_values() {
        let bytes: Vec<u8> = vec![0, 1, 127, 200, 255];
        assert_eq!(to_bin(&to_str(&bytes)), bytes);
    }

    #[test]
    fn diff_recovers_source_and_destination_buffers() {
        let src_buf = vec![1u8, 2, 3, 4];
        let dst_buf = vec![1u8, 9, 3, 4];
        let patch = diff(&src_buf, &dst_buf);
        assert_eq!(src(&patch), src_buf);
        assert_eq!(dst(&patch), dst_buf);
    }

    #[test]
    fn apply_replays_inserts_and_deletes_against_the_source() {
        // `apply` walks the patch back-to-front and reports positions in the
        // original buffer's coordinates, so callbacks can mutate a growing
        // copy from the tail forward without needing to track an offset.
        let src_buf = vec![10u8, 20, 30];
        let dst_buf = vec![10u8, 99, 30];
        let patch = diff(&src_buf, &dst_buf);

        let mut rebuilt = src_buf.clone();
        apply(
            &patch,
            src_buf.len(),
            |pos, bytes| {
                for (i, b) in bytes.into_iter().enumerate() {
                    rebuilt.insert(pos + i, b);
                }
            },
            |pos, len| {
                rebuilt.drain(pos..pos + len);
            },
        );
        assert_eq!(rebuilt, dst_buf);
    }
}
