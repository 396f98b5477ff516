use super::types::{cmp_id_time_sid, ArrAtom, BinAtom, Id, StrAtom};

fn find_insert_index_rga(slots: &[Id], reference: Id, container: Id, id: Id) -> Option<usize> {
    let mut left = if reference == container {
        if slots.is_empty() {
            return Some(0);
        }
        let first = slots[0];
        if cmp_id_time_sid(first, id).is_lt() {
            return Some(0);
        }
        if first == id {
            return None;
        }
        0usize
    } else {
        slots.iter().position(|slot| *slot == reference)?
    };

    loop {
        let right = left + 1;
        if right >= slots.len() {
            break;
        }
        let right_id = slots[right];
        if right_id.time < id.time {
            break;
        }
        if right_id.time == id.time {
            if right_id.sid == id.sid {
                return None;
            }
            if right_id.sid < id.sid {
                break;
            }
        }
        left = right;
    }

    Some(left + 1)
}

pub(crate) fn find_insert_index_str(
    atoms: &[StrAtom],
    reference: Id,
    container: Id,
    id: Id,
) -> Option<usize> {
    let slots = atoms.iter().map(|a| a.slot).collect::<Vec<_>>();
    find_insert_index_rga(&slots, reference, container, id)
}

pub(crate) fn find_insert_index_bin(
    atoms: &[BinAtom],
    reference: Id,
    container: Id,
    id: Id,
) -> Option<usize> {
    let slots = atoms.iter().map(|a| a.slot).collect::<Vec<_>>();
    find_insert_index_rga(&slots, reference, container, id)
}

pub(crate) fn find_insert_index_arr(
    atoms: &[ArrAtom],
    reference: Id,
    container: Id,
    id: Id,
) -> Option<usize> {
    let slots = atoms.iter().map(|a| a.slot).collect::<Vec<_>>();
    find_insert_index_rga(&slots, reference, container, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(sid: u64, time: u64) -> Id {
        Id { sid, time }
    }

    #[test]
    fn inserting_into_an_empty_container_is_always_index_zero() {
        let container = id(1, 0);
        assert_eq!(
            find_insert_index_rga(&[], container, container, id(2, 5)),
            Some(0)
        );
    }

    #[test]
    fn inserting_a_duplicate_id_at_the_head_is_rejected() {
        let container = id(1, 0);
        let slots = vec![id(2, 5)];
        assert_eq!(
            find_insert_index_rga(&slots, container, container, id(2, 5)),
            None
        );
    }

    #[test]
    fn head_insert_walks_past_slots_with_a_later_time() {
        // Slots are ordered newest-first; an id with a smaller time than the
        // head slot still needs to walk forward to find where it sorts.
        let container = id(1, 0);
        let slots = vec![id(1, 10), id(1, 8), id(1, 5)];
        assert_eq!(
            find_insert_index_rga(&slots, container, container, id(1, 9)),
            Some(1)
        );
    }

    #[test]
    fn same_time_ties_break_on_descending_session_id() {
        let container = id(1, 0);
        let slots = vec![id(5, 10), id(3, 10)];
        assert_eq!(
            find_insert_index_rga(&slots, container, container, id(4, 10)),
            Some(1)
        );
    }

    #[test]
    fn insert_after_an_explicit_reference_slot() {
        let container = id(1, 0);
        let slots = vec![id(1, 10), id(1, 8)];
        // reference = slots[0], inserting a new id older than both slots.
        assert_eq!(
            find_insert_index_rga(&slots, slots[0], container, id(1, 1)),
            Some(2)
        );
    }

    #[test]
    fn unknown_reference_yields_no_insertion_point() {
        let container = id(1, 0);
        let slots = vec![id(1, 10)];
        assert_eq!(
            find_insert_index_rga(&slots, id(9, 9), container, id(1, 1)),
            None
        );
    }
}
