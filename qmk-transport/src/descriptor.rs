//! HID report descriptor walker
//!
//! Only what discovery and report-length negotiation need: top-level
//! application collections and the size of every input/output report.

use std::collections::BTreeMap;

use crate::types::Usage;

/// Item types (bits 2-3 of the prefix)
mod item_type {
    pub const MAIN: u8 = 0;
    pub const GLOBAL: u8 = 1;
    pub const LOCAL: u8 = 2;
}

/// Main item tags
mod main_tag {
    pub const INPUT: u8 = 0x8;
    pub const OUTPUT: u8 = 0x9;
    pub const COLLECTION: u8 = 0xA;
    pub const FEATURE: u8 = 0xB;
    pub const END_COLLECTION: u8 = 0xC;
}

/// Global item tags
mod global_tag {
    pub const USAGE_PAGE: u8 = 0x0;
    pub const REPORT_SIZE: u8 = 0x7;
    pub const REPORT_ID: u8 = 0x8;
    pub const REPORT_COUNT: u8 = 0x9;
    pub const PUSH: u8 = 0xA;
    pub const POP: u8 = 0xB;
}

const LOCAL_USAGE: u8 = 0x0;
const COLLECTION_APPLICATION: u32 = 0x01;
const LONG_ITEM_PREFIX: u8 = 0xFE;

/// Report direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReportKind {
    Input,
    Output,
    Feature,
}

/// One report declared by the descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportInfo {
    pub kind: ReportKind,
    pub id: u8,
    /// Application collection the report was declared in
    pub application: Option<Usage>,
    /// Payload length in bytes (report id excluded)
    pub len: usize,
}

/// Parsed summary of a report descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportDescriptor {
    pub applications: Vec<Usage>,
    pub reports: Vec<ReportInfo>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Globals {
    usage_page: u16,
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

impl ReportDescriptor {
    /// Walk a raw descriptor. Truncated trailing items are ignored.
    pub fn parse(data: &[u8]) -> Self {
        let mut globals = Globals::default();
        let mut stack: Vec<Globals> = Vec::new();
        let mut usages: Vec<Usage> = Vec::new();
        let mut depth = 0usize;
        let mut application: Option<Usage> = None;
        let mut applications = Vec::new();
        let mut bits: BTreeMap<(ReportKind, u8), (Option<Usage>, u32)> = BTreeMap::new();

        let mut pos = 0;
        while pos < data.len() {
            let prefix = data[pos];
            if prefix == LONG_ITEM_PREFIX {
                let size = data.get(pos + 1).copied().unwrap_or(0) as usize;
                pos += 3 + size;
                continue;
            }

            let size = match prefix & 0x03 {
                3 => 4,
                n => n as usize,
            };
            if pos + 1 + size > data.len() {
                break;
            }
            let value = data[pos + 1..pos + 1 + size]
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32);
            let kind = (prefix >> 2) & 0x03;
            let tag = prefix >> 4;
            pos += 1 + size;

            match kind {
                item_type::MAIN => {
                    match tag {
                        main_tag::COLLECTION => {
                            if depth == 0 && value == COLLECTION_APPLICATION {
                                let usage = usages
                                    .first()
                                    .copied()
                                    .unwrap_or(Usage::new(globals.usage_page, 0));
                                applications.push(usage);
                                application = Some(usage);
                            }
                            depth += 1;
                        }
                        main_tag::END_COLLECTION => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                application = None;
                            }
                        }
                        main_tag::INPUT | main_tag::OUTPUT | main_tag::FEATURE => {
                            let report_kind = match tag {
                                main_tag::INPUT => ReportKind::Input,
                                main_tag::OUTPUT => ReportKind::Output,
                                _ => ReportKind::Feature,
                            };
                            let entry = bits
                                .entry((report_kind, globals.report_id))
                                .or_insert((application, 0));
                            entry.1 += globals.report_size * globals.report_count;
                        }
                        _ => {}
                    }
                    usages.clear();
                }
                item_type::GLOBAL => match tag {
                    global_tag::USAGE_PAGE => globals.usage_page = value as u16,
                    global_tag::REPORT_SIZE => globals.report_size = value,
                    global_tag::REPORT_ID => globals.report_id = value as u8,
                    global_tag::REPORT_COUNT => globals.report_count = value,
                    global_tag::PUSH => stack.push(globals),
                    global_tag::POP => {
                        if let Some(saved) = stack.pop() {
                            globals = saved;
                        }
                    }
                    _ => {}
                },
                item_type::LOCAL => {
                    if tag == LOCAL_USAGE {
                        let usage = if size == 4 {
                            Usage::from_extended(value)
                        } else {
                            Usage::new(globals.usage_page, value as u16)
                        };
                        usages.push(usage);
                    }
                }
                _ => {}
            }
        }

        let reports = bits
            .into_iter()
            .map(|((kind, id), (application, total))| ReportInfo {
                kind,
                id,
                application,
                len: total.div_ceil(8) as usize,
            })
            .collect();

        Self {
            applications,
            reports,
        }
    }

    /// Payload length of a report, if declared
    pub fn report_len(&self, kind: ReportKind, id: u8) -> Option<usize> {
        self.reports
            .iter()
            .find(|r| r.kind == kind && r.id == id)
            .map(|r| r.len)
    }

    /// True if some input report belongs to the given application collection
    pub fn has_input_application(&self, usage: Usage) -> bool {
        self.reports
            .iter()
            .any(|r| r.kind == ReportKind::Input && r.application == Some(usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// QMK raw HID interface descriptor (RAW_EPSIZE = 32)
    #[rustfmt::skip]
    const QMK_RAW_HID: &[u8] = &[
        0x06, 0x60, 0xFF,  // Usage Page (Vendor 0xFF60)
        0x09, 0x61,        // Usage (0x61)
        0xA1, 0x01,        // Collection (Application)
        0x09, 0x62,        //   Usage (0x62)
        0x15, 0x00,        //   Logical Minimum (0)
        0x26, 0xFF, 0x00,  //   Logical Maximum (255)
        0x95, 0x20,        //   Report Count (32)
        0x75, 0x08,        //   Report Size (8)
        0x81, 0x02,        //   Input (Data,Var,Abs)
        0x09, 0x63,        //   Usage (0x63)
        0x15, 0x00,        //   Logical Minimum (0)
        0x26, 0xFF, 0x00,  //   Logical Maximum (255)
        0x95, 0x20,        //   Report Count (32)
        0x75, 0x08,        //   Report Size (8)
        0x91, 0x02,        //   Output (Data,Var,Abs)
        0xC0,              // End Collection
    ];

    #[rustfmt::skip]
    const BOOT_KEYBOARD: &[u8] = &[
        0x05, 0x01,        // Usage Page (Generic Desktop)
        0x09, 0x06,        // Usage (Keyboard)
        0xA1, 0x01,        // Collection (Application)
        0x05, 0x07,        //   Usage Page (Kbrd/Keypad)
        0x19, 0xE0,        //   Usage Minimum (0xE0)
        0x29, 0xE7,        //   Usage Maximum (0xE7)
        0x95, 0x08,        //   Report Count (8)
        0x75, 0x01,        //   Report Size (1)
        0x81, 0x02,        //   Input
        0x95, 0x01,        //   Report Count (1)
        0x75, 0x08,        //   Report Size (8)
        0x81, 0x01,        //   Input (Const)
        0x95, 0x05,        //   Report Count (5)
        0x75, 0x01,        //   Report Size (1)
        0x91, 0x02,        //   Output (LEDs)
        0x95, 0x01,        //   Report Count (1)
        0x75, 0x03,        //   Report Size (3)
        0x91, 0x01,        //   Output (padding)
        0x95, 0x06,        //   Report Count (6)
        0x75, 0x08,        //   Report Size (8)
        0x81, 0x00,        //   Input (Array)
        0xC0,              // End Collection
    ];

    #[test]
    fn test_qmk_raw_hid_descriptor() {
        let desc = ReportDescriptor::parse(QMK_RAW_HID);
        assert_eq!(desc.applications, vec![Usage::QMK_RAW_HID]);
        assert_eq!(desc.report_len(ReportKind::Input, 0), Some(32));
        assert_eq!(desc.report_len(ReportKind::Output, 0), Some(32));
        assert!(desc.has_input_application(Usage::QMK_RAW_HID));
    }

    #[test]
    fn test_boot_keyboard_does_not_qualify() {
        let desc = ReportDescriptor::parse(BOOT_KEYBOARD);
        assert_eq!(desc.applications, vec![Usage::new(0x0001, 0x0006)]);
        assert_eq!(desc.report_len(ReportKind::Input, 0), Some(8));
        assert_eq!(desc.report_len(ReportKind::Output, 0), Some(1));
        assert!(!desc.has_input_application(Usage::QMK_RAW_HID));
    }

    #[test]
    fn test_report_ids_tracked_separately() {
        #[rustfmt::skip]
        let data = [
            0x06, 0x60, 0xFF, 0x09, 0x61, 0xA1, 0x01,
            0x85, 0x01,        // Report ID (1)
            0x95, 0x10, 0x75, 0x08, 0x81, 0x02,
            0x85, 0x02,        // Report ID (2)
            0x95, 0x40, 0x75, 0x08, 0x81, 0x02,
            0xC0,
        ];
        let desc = ReportDescriptor::parse(&data);
        assert_eq!(desc.report_len(ReportKind::Input, 1), Some(16));
        assert_eq!(desc.report_len(ReportKind::Input, 2), Some(64));
        assert_eq!(desc.report_len(ReportKind::Input, 0), None);
    }

    #[test]
    fn test_push_pop_restores_globals() {
        #[rustfmt::skip]
        let data = [
            0x06, 0x60, 0xFF, 0x09, 0x61, 0xA1, 0x01,
            0x95, 0x20, 0x75, 0x08,
            0xA4,              // Push
            0x95, 0x01, 0x75, 0x01,
            0xB4,              // Pop
            0x81, 0x02,
            0xC0,
        ];
        let desc = ReportDescriptor::parse(&data);
        assert_eq!(desc.report_len(ReportKind::Input, 0), Some(32));
    }

    #[test]
    fn test_truncated_descriptor() {
        let desc = ReportDescriptor::parse(&[0x06, 0x60]);
        assert!(desc.applications.is_empty());
        assert!(desc.reports.is_empty());
    }
}
