pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (usize::from(count) + 7) / 8
}

/// pack bits LSB-first, the first value lands in bit 0 of the first byte
pub(crate) fn pack_bits(values: &[bool]) -> Vec<u8> {
    values
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, bit)| if *bit { acc | (1 << i) } else { acc })
        })
        .collect()
}

/// unpack every bit of every byte LSB-first
pub(crate) fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |i| (byte & (1 << i)) != 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_byte_count() {
        assert_eq!(num_bytes_for_bits(1), 1);
        assert_eq!(num_bytes_for_bits(8), 1);
        assert_eq!(num_bytes_for_bits(9), 2);
        assert_eq!(num_bytes_for_bits(2000), 250);
    }

    #[test]
    fn packs_lsb_first() {
        // 10 coils from the Modbus application protocol example
        let values = [
            true, false, true, true, false, false, true, true, true, false,
        ];
        assert_eq!(pack_bits(&values), vec![0xCD, 0x01]);
    }

    #[test]
    fn unpacks_lsb_first() {
        let bits = unpack_bits(&[0x01, 0x80]);
        assert_eq!(bits.len(), 16);
        assert!(bits[0]);
        assert!(bits[1..15].iter().all(|x| !*x));
        assert!(bits[15]);
    }
}
