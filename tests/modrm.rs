use x86_predecode_rs::{ExtMachInst, MachineState, PcState, Predecoder, CHUNK_BYTES};

fn decode_with(pre: &mut Predecoder, addr: u64, bytes: &[u8]) -> (ExtMachInst, u8) {
    let pc = PcState::new(addr);
    let mut fetch_pc = addr & !(CHUNK_BYTES as u64 - 1);
    while !pre.inst_ready() {
        let mut chunk = [0u8; CHUNK_BYTES];
        for (i, slot) in chunk.iter_mut().enumerate() {
            let a = fetch_pc + i as u64;
            if a >= addr && (a - addr) < bytes.len() as u64 {
                *slot = bytes[(a - addr) as usize];
            }
        }
        pre.more_bytes(&pc, fetch_pc, chunk).expect("no fault");
        if pre.need_more_bytes() {
            fetch_pc += CHUNK_BYTES as u64;
            assert!(
                fetch_pc <= addr + bytes.len() as u64 + CHUNK_BYTES as u64,
                "ran past the input"
            );
        }
    }
    let mut next = pc;
    let emi = *pre.take_inst(&mut next).expect("ready");
    (emi, next.size().expect("size"))
}

fn decode_one(machine: MachineState, addr: u64, bytes: &[u8]) -> (ExtMachInst, u8) {
    let mut pre = Predecoder::new(machine);
    decode_with(&mut pre, addr, bytes)
}

#[test]
fn register_form_has_no_displacement() {
    // 89 D8: MOV eax, ebx
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0x89, 0xD8]);
    assert_eq!(len, 2);
    assert_eq!(emi.modrm.mode(), 3);
    assert_eq!(emi.modrm.reg(), 3);
    assert_eq!(emi.modrm.rm(), 0);
    assert_eq!(emi.displacement, 0);
    assert_eq!(emi.sib.0, 0);
}

#[test]
fn disp8_form() {
    // 89 58 10: MOV [rax+0x10], ebx
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0x89, 0x58, 0x10]);
    assert_eq!(len, 3);
    assert_eq!(emi.modrm.mode(), 1);
    assert_eq!(emi.displacement, 0x10);
}

#[test]
fn disp8_is_sign_extended() {
    // 89 58 FE: MOV [rax-2], ebx
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0x89, 0x58, 0xFE]);
    assert_eq!(len, 3);
    assert_eq!(emi.displacement, -2);
}

#[test]
fn disp32_form() {
    // 89 98 FE FF FF FF: MOV [rax-2], ebx with a 4-byte displacement
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0x89, 0x98, 0xFE, 0xFF, 0xFF, 0xFF]);
    assert_eq!(len, 6);
    assert_eq!(emi.modrm.mode(), 2);
    assert_eq!(emi.displacement, -2);
}

#[test]
fn rip_relative_forces_disp32() {
    // 8B 05 disp32: MOV eax, [rip+0x10]
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0x8B, 0x05, 0x10, 0x00, 0x00, 0x00]);
    assert_eq!(len, 6);
    assert_eq!(emi.modrm.mode(), 0);
    assert_eq!(emi.modrm.rm(), 5);
    assert_eq!(emi.displacement, 0x10);
}

#[test]
fn sib_byte_is_consumed() {
    // 8B 04 88: MOV eax, [rax+rcx*4]
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0x8B, 0x04, 0x88]);
    assert_eq!(len, 3);
    assert_eq!(emi.modrm.rm(), 4);
    assert_eq!(emi.sib.scale(), 2);
    assert_eq!(emi.sib.index(), 1);
    assert_eq!(emi.sib.base(), 0);
    assert_eq!(emi.displacement, 0);
}

#[test]
fn sib_no_base_forces_disp32() {
    // 8B 04 25 disp32: MOV eax, [0x11223344]
    let bytes = [0x8B, 0x04, 0x25, 0x44, 0x33, 0x22, 0x11];
    let (emi, len) = decode_one(MachineState::long64(), 0, &bytes);
    assert_eq!(len, 7);
    assert_eq!(emi.sib.base(), 5);
    assert_eq!(emi.displacement, 0x11223344);
}

#[test]
fn sib_with_base_and_disp8() {
    // 8B 44 24 08: MOV eax, [rsp+8]
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0x8B, 0x44, 0x24, 0x08]);
    assert_eq!(len, 4);
    assert_eq!(emi.sib.base(), 4);
    assert_eq!(emi.displacement, 8);
}

#[test]
fn sixteen_bit_addressing_direct() {
    // 8B 16 34 12: MOV dx, [0x1234] under 16-bit addressing
    let (emi, len) = decode_one(MachineState::real16(), 0, &[0x8B, 0x16, 0x34, 0x12]);
    assert_eq!(len, 4);
    assert_eq!(emi.addr_size, 2);
    assert_eq!(emi.displacement, 0x1234);
    // no SIB under 16-bit addressing even though rm has the indicator value
    let (emi, len) = decode_one(MachineState::real16(), 0, &[0x8B, 0x04]);
    assert_eq!(len, 2);
    assert_eq!(emi.sib.0, 0);
}

#[test]
fn sixteen_bit_addressing_disp_sizes() {
    // mod 01 keeps a one-byte displacement
    let (emi, len) = decode_one(MachineState::real16(), 0, &[0x8B, 0x42, 0x05]);
    assert_eq!(len, 3);
    assert_eq!(emi.displacement, 5);
    // mod 10 takes two bytes
    let (emi, len) = decode_one(MachineState::real16(), 0, &[0x8B, 0x82, 0xCD, 0xAB]);
    assert_eq!(len, 4);
    assert_eq!(emi.displacement as u64 & 0xFFFF, 0xABCD);
}

#[test]
fn addr_override_switches_addressing_rules() {
    // 67 8B 16 imm16 under protected mode: 16-bit addressing rules apply
    let (emi, len) = decode_one(MachineState::protected32(), 0, &[0x67, 0x8B, 0x16, 0x34, 0x12]);
    assert_eq!(len, 5);
    assert_eq!(emi.addr_size, 2);
    assert_eq!(emi.displacement, 0x1234);
}

#[test]
fn no_modrm_opcode_never_grows_structure() {
    // 0xC3 RET: classified as no-ModRM, so SIB/displacement can never appear
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0xC3]);
    assert_eq!(len, 1);
    assert_eq!(emi.modrm.0, 0);
    assert_eq!(emi.sib.0, 0);
    assert_eq!(emi.displacement, 0);
}

#[test]
fn x87_escape_takes_modrm() {
    // D9 45 04: FLD dword [rbp+4]
    let (emi, len) = decode_one(MachineState::long64(), 0, &[0xD9, 0x45, 0x04]);
    assert_eq!(len, 3);
    assert_eq!(emi.modrm.reg(), 0);
    assert_eq!(emi.displacement, 4);
}
