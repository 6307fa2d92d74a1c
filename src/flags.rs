//! Fixed-header and CONNECT/CONNACK flag bits using `BeBytes` flag decomposition

use bebytes::BeBytes;

/// Connect Flags byte of the CONNECT variable header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
#[bebytes(flags)]
pub enum ConnectFlags {
    /// Reserved bit, must be 0
    Reserved = 0x01,
    /// Clean Start (v5) / Clean Session (v3.1.1)
    CleanStart = 0x02,
    WillFlag = 0x04,
    WillQoS0 = 0x08,
    WillQoS1 = 0x10,
    WillRetain = 0x20,
    PasswordFlag = 0x40,
    UsernameFlag = 0x80,
}

impl ConnectFlags {
    #[must_use]
    pub fn extract_will_qos(flags: u8) -> u8 {
        (flags >> crate::constants::connect_flags::WILL_QOS_SHIFT)
            & crate::constants::connect_flags::WILL_QOS_MASK
    }

    #[must_use]
    pub fn with_will_qos(mut flags: u8, qos: u8) -> u8 {
        flags &= crate::constants::connect_flags::WILL_QOS_CLEAR_MASK;
        flags |= (qos & crate::constants::connect_flags::WILL_QOS_MASK)
            << crate::constants::connect_flags::WILL_QOS_SHIFT;
        flags
    }
}

/// Flags nibble of the PUBLISH fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
#[bebytes(flags)]
pub enum PublishFlags {
    Retain = 0x01,
    QoS0 = 0x02,
    QoS1 = 0x04,
    /// Duplicate delivery
    Dup = 0x08,
}

impl PublishFlags {
    #[must_use]
    pub fn extract_qos(flags: u8) -> u8 {
        (flags >> crate::constants::publish_flags::QOS_SHIFT)
            & crate::constants::publish_flags::QOS_MASK
    }

    #[must_use]
    pub fn with_qos(mut flags: u8, qos: u8) -> u8 {
        flags &= crate::constants::publish_flags::QOS_CLEAR_MASK;
        flags |= (qos & crate::constants::publish_flags::QOS_MASK)
            << crate::constants::publish_flags::QOS_SHIFT;
        flags
    }
}

/// Connect Acknowledge Flags byte of CONNACK; bits 1-7 are reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
#[bebytes(flags)]
pub enum ConnAckFlags {
    SessionPresent = 0x01,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_flags_decompose() {
        // clean start + username + password
        let flags: u8 = 0xC2;
        let decomposed = ConnectFlags::decompose(flags);

        assert_eq!(decomposed.len(), 3);
        assert!(decomposed.contains(&ConnectFlags::CleanStart));
        assert!(decomposed.contains(&ConnectFlags::UsernameFlag));
        assert!(decomposed.contains(&ConnectFlags::PasswordFlag));
        assert!(!decomposed.contains(&ConnectFlags::Reserved));
    }

    #[test]
    fn test_will_qos_bits() {
        let flags = ConnectFlags::with_will_qos(ConnectFlags::WillFlag as u8, 2);
        assert_eq!(flags, 0x14);
        assert_eq!(ConnectFlags::extract_will_qos(flags), 2);
        assert_eq!(ConnectFlags::extract_will_qos(ConnectFlags::with_will_qos(flags, 1)), 1);
    }

    #[test]
    fn test_publish_flags_decompose() {
        // DUP + QoS 2 + Retain
        let flags: u8 = 0x0D;
        let decomposed = PublishFlags::decompose(flags);

        assert!(decomposed.contains(&PublishFlags::Retain));
        assert!(decomposed.contains(&PublishFlags::QoS1));
        assert!(decomposed.contains(&PublishFlags::Dup));
        assert_eq!(PublishFlags::extract_qos(flags), 2);
        assert_eq!(PublishFlags::with_qos(0x01, 1), 0x03);
    }

    #[test]
    fn test_connack_flags() {
        let decomposed = ConnAckFlags::decompose(0x01);
        assert_eq!(decomposed, vec![ConnAckFlags::SessionPresent]);
        assert_eq!(PublishFlags::iter_flags(0x0D).count(), 3);
    }
}
