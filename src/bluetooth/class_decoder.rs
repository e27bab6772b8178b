//! Class-of-device decoding
//!
//! Maps the Bluetooth class-of-device bitfield onto a coarse [`CategoryTag`].
//! The minor-class ranges are a heuristic and will misclassify some devices;
//! anything unrecognised falls back to the major class's generic tag.

use crate::bluetooth::device::CategoryTag;

/// Major device class field, bits 8-12
const MAJOR_CLASS_MASK: u32 = 0x0000_1F00;
const MAJOR_CLASS_SHIFT: u32 = 8;

/// Minor device class field, bits 2-7
const MINOR_CLASS_MASK: u32 = 0x0000_00FC;
const MINOR_CLASS_SHIFT: u32 = 2;

/// Both HID bits of a peripheral's minor class
const PERIPHERAL_HID_BITS: u32 = 0x0000_00C0;

const MAJOR_COMPUTER: u32 = 0x01;
const MAJOR_PHONE: u32 = 0x02;
const MAJOR_AUDIO_VIDEO: u32 = 0x04;
const MAJOR_PERIPHERAL: u32 = 0x05;
const MAJOR_WEARABLE: u32 = 0x07;

const HEADSET_MINORS: std::ops::RangeInclusive<u32> = 0x01..=0x08;
const SPEAKER_MINORS: std::ops::RangeInclusive<u32> = 0x09..=0x0C;
const MOUSE_MINORS: std::ops::RangeInclusive<u32> = (0x80 >> 2)..=(0xAC >> 2);
const KEYBOARD_MINORS: std::ops::RangeInclusive<u32> = (0x40 >> 2)..=(0x6C >> 2);

const WEARABLE_WATCH: u32 = 0x01;
const WEARABLE_FITNESS: u32 = 0x02;

/// Decode an optional class-of-device value into a category tag
pub fn decode(class_of_device: Option<u32>) -> CategoryTag {
    match class_of_device {
        Some(cod) => decode_class(cod),
        None => CategoryTag::Generic,
    }
}

/// Decode a class-of-device value into a category tag
pub fn decode_class(cod: u32) -> CategoryTag {
    match major_class(cod) {
        MAJOR_COMPUTER => CategoryTag::Computer,
        MAJOR_PHONE => CategoryTag::Phone,
        MAJOR_AUDIO_VIDEO => {
            let minor = minor_class(cod);
            if HEADSET_MINORS.contains(&minor) {
                CategoryTag::Headset
            } else if SPEAKER_MINORS.contains(&minor) {
                CategoryTag::Speaker
            } else {
                CategoryTag::AudioGeneric
            }
        }
        MAJOR_PERIPHERAL => {
            if cod & PERIPHERAL_HID_BITS != PERIPHERAL_HID_BITS {
                return CategoryTag::PeripheralGeneric;
            }
            let minor = minor_class(cod);
            if MOUSE_MINORS.contains(&minor) {
                CategoryTag::Mouse
            } else if KEYBOARD_MINORS.contains(&minor) {
                CategoryTag::Keyboard
            } else {
                CategoryTag::PeripheralGeneric
            }
        }
        MAJOR_WEARABLE => match minor_class(cod) {
            WEARABLE_WATCH => CategoryTag::Watch,
            WEARABLE_FITNESS => CategoryTag::FitnessTracker,
            _ => CategoryTag::Generic,
        },
        _ => CategoryTag::Generic,
    }
}

fn major_class(cod: u32) -> u32 {
    (cod & MAJOR_CLASS_MASK) >> MAJOR_CLASS_SHIFT
}

fn minor_class(cod: u32) -> u32 {
    (cod & MINOR_CLASS_MASK) >> MINOR_CLASS_SHIFT
}
