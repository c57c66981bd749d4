use bitflags::bitflags;

bitflags! {
    /// Protocol Support Indicator bits, emitted MSB first as the six
    /// octets of the Protocol Support Reply payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProtocolSupport: u64 {
        const SIMPLE = 0x8000_0000_0000;
        const DATAGRAM = 0x4000_0000_0000;
        const STREAM = 0x2000_0000_0000;
        const MEMORY_CONFIGURATION = 0x1000_0000_0000;
        const RESERVATION = 0x0800_0000_0000;
        const EVENT_EXCHANGE = 0x0400_0000_0000;
        const IDENTIFICATION = 0x0200_0000_0000;
        const TEACHING_LEARNING = 0x0100_0000_0000;
        const REMOTE_BUTTON = 0x0080_0000_0000;
        const ABBREVIATED_DEFAULT_CDI = 0x0040_0000_0000;
        const DISPLAY = 0x0020_0000_0000;
        const SIMPLE_NODE_INFORMATION = 0x0010_0000_0000;
        const CONFIGURATION_DESCRIPTION_INFO = 0x0008_0000_0000;
        const FIRMWARE_UPGRADE = 0x0000_2000_0000;
        const FIRMWARE_UPGRADE_ACTIVE = 0x0000_1000_0000;
    }
}

impl ProtocolSupport {
    /// Render the indicator as the six reply octets. When
    /// `firmware_upgrade_active` is set the active bit replaces the
    /// idle firmware-upgrade bit.
    pub fn to_reply_bytes(self, firmware_upgrade_active: bool) -> [u8; 6] {
        let mut bits = self;
        if firmware_upgrade_active {
            bits.remove(ProtocolSupport::FIRMWARE_UPGRADE);
            bits.insert(ProtocolSupport::FIRMWARE_UPGRADE_ACTIVE);
        }
        let raw = bits.bits().to_be_bytes();
        [raw[2], raw[3], raw[4], raw[5], raw[6], raw[7]]
    }
}

/// Simple Node Information Protocol strings.
///
/// The manufacturer block is fixed at build time; the user name and
/// description live in configuration memory and are fetched through
/// the configuration-memory callback when a SNIP reply is built.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SnipData {
    pub mfg_version: u8,
    pub name: &'static str,
    pub model: &'static str,
    pub hardware_version: &'static str,
    pub software_version: &'static str,
    pub user_version: u8,
}

impl Default for SnipData {
    fn default() -> Self {
        SnipData {
            mfg_version: 4,
            name: "",
            model: "",
            hardware_version: "",
            software_version: "",
            user_version: 2,
        }
    }
}

/// Well-known configuration memory address spaces.
pub mod space {
    pub const CONFIGURATION_DEFINITION_INFO: u8 = 0xFF;
    pub const ALL: u8 = 0xFE;
    pub const CONFIGURATION_MEMORY: u8 = 0xFD;
    pub const ACDI_MANUFACTURER: u8 = 0xFC;
    pub const ACDI_USER: u8 = 0xFB;
    pub const TRACTION_FUNCTION_DEFINITION: u8 = 0xFA;
    pub const TRACTION_FUNCTION_CONFIG: u8 = 0xF9;
    pub const FIRMWARE: u8 = 0xEF;
}

/// Properties of one configuration memory address space, reported by
/// the Get Address Space Information command.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressSpaceInfo {
    pub present: bool,
    pub read_only: bool,
    pub low_address_valid: bool,
    pub address_space: u8,
    pub highest_address: u32,
    pub low_address: u32,
    pub description: &'static str,
}

/// Capabilities reported by the Get Configuration Options command.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigMemOptions {
    pub write_under_mask_supported: bool,
    pub unaligned_reads_supported: bool,
    pub unaligned_writes_supported: bool,
    pub read_from_manufacturer_space_supported: bool,
    pub read_from_user_space_supported: bool,
    pub write_to_user_space_supported: bool,
    pub stream_read_write_supported: bool,
    pub high_address_space: u8,
    pub low_address_space: u8,
    pub description: &'static str,
}

/// Complete build-time description of a virtual node.
///
/// Typically a `static` in the application; the node registry keeps a
/// reference for the lifetime of the node.
#[derive(Debug, Clone, Copy)]
pub struct NodeParameters {
    pub snip: SnipData,
    pub protocol_support: ProtocolSupport,
    pub consumer_count_autocreate: u16,
    pub producer_count_autocreate: u16,
    /// Configuration Description Information XML.
    pub cdi: &'static [u8],
    pub address_space_configuration_definition: AddressSpaceInfo,
    pub address_space_all: AddressSpaceInfo,
    pub address_space_config_memory: AddressSpaceInfo,
    pub address_space_acdi_manufacturer: AddressSpaceInfo,
    pub address_space_acdi_user: AddressSpaceInfo,
    pub address_space_firmware: AddressSpaceInfo,
    pub configuration_options: ConfigMemOptions,
    /// Configuration memory address of the user-assigned node name.
    pub config_mem_user_name_address: u32,
    /// Configuration memory address of the user description.
    pub config_mem_user_description_address: u32,
}

impl NodeParameters {
    const EMPTY_SPACE: AddressSpaceInfo = AddressSpaceInfo {
        present: false,
        read_only: false,
        low_address_valid: false,
        address_space: 0,
        highest_address: 0,
        low_address: 0,
        description: "",
    };

    /// An empty descriptor, usable as a `static` starting point.
    pub const fn new() -> NodeParameters {
        NodeParameters {
            snip: SnipData {
                mfg_version: 4,
                name: "",
                model: "",
                hardware_version: "",
                software_version: "",
                user_version: 2,
            },
            protocol_support: ProtocolSupport::empty(),
            consumer_count_autocreate: 0,
            producer_count_autocreate: 0,
            cdi: &[],
            address_space_configuration_definition: NodeParameters::EMPTY_SPACE,
            address_space_all: NodeParameters::EMPTY_SPACE,
            address_space_config_memory: NodeParameters::EMPTY_SPACE,
            address_space_acdi_manufacturer: NodeParameters::EMPTY_SPACE,
            address_space_acdi_user: NodeParameters::EMPTY_SPACE,
            address_space_firmware: NodeParameters::EMPTY_SPACE,
            configuration_options: ConfigMemOptions {
                write_under_mask_supported: false,
                unaligned_reads_supported: false,
                unaligned_writes_supported: false,
                read_from_manufacturer_space_supported: false,
                read_from_user_space_supported: false,
                write_to_user_space_supported: false,
                stream_read_write_supported: false,
                high_address_space: space::CONFIGURATION_DEFINITION_INFO,
                low_address_space: space::CONFIGURATION_MEMORY,
                description: "",
            },
            config_mem_user_name_address: 0x0000_0000,
            config_mem_user_description_address: 0x0000_003F,
        }
    }
}

impl Default for NodeParameters {
    fn default() -> Self {
        NodeParameters::new()
    }
}
