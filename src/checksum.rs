/// Computes the internet checksum over `data` according to RFC 1071
/// <https://datatracker.ietf.org/doc/html/rfc1071>.
///
/// The buffer is summed as consecutive big-endian 16-bit words. An odd
/// trailing byte counts as the high byte of a word whose low byte is zero.
/// Carries above bit 16 are folded back into the low 16 bits until none
/// remain, and the one's complement of the folded sum is returned.
#[must_use]
pub fn compute_internet_checksum(data: &[u8]) -> u16 {
    let mut sub_total: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sub_total += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [trailing] = words.remainder() {
        sub_total += u32::from(*trailing) << 8;
    }
    while sub_total >> 16 != 0 {
        sub_total = (sub_total & 0xFFFF) + (sub_total >> 16);
    }
    !((sub_total & 0xFFFF) as u16)
}
