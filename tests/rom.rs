mod common;

use common::RomBuilder;

#[test]
fn test_title() {
    let rom = RomBuilder::lorom().title("TEST").build();
    assert_eq!(rom.title(), "TEST");
}

#[test]
fn test_reset_vector() {
    let rom = RomBuilder::lorom().reset_vector(0x8000).build();
    assert_eq!(rom.reset_vector(), 0x8000);
}

#[test]
fn test_nmi_vector() {
    let rom = RomBuilder::lorom().nmi_vector(0x8010).build();
    assert_eq!(rom.nmi_vector(), 0x8010);
}
