//! Extracts a VM's MAC address from its libvirt domain XML description.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::types::MacAddress;

/// Find the first `<interface>`'s `<mac address="…">` attribute in a
/// libvirt domain XML description.
///
/// An absent `<interface>` element, or one whose `<mac>` attribute
/// doesn't parse as a MAC address, yields `None` rather than an error —
/// per the spec, gARP is simply skipped for that VM.
pub fn mac_from_domain_xml(xml: &str) -> Option<MacAddress> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_interface = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = e.local_name();
                let name = local.as_ref();
                if name == b"interface" {
                    in_interface = true;
                } else if in_interface && name == b"mac" {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"address" {
                            let value = attr.unescape_value().ok()?;
                            return MacAddress::parse(&value);
                        }
                    }
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"interface" => {
                in_interface = false;
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN_XML: &str = r#"
        <domain type='kvm'>
          <name>web1</name>
          <devices>
            <interface type='bridge'>
              <mac address='52:54:00:11:22:33'/>
              <source bridge='br0'/>
            </interface>
          </devices>
        </domain>
    "#;

    #[test]
    fn extracts_mac_from_first_interface() {
        let mac = mac_from_domain_xml(DOMAIN_XML).unwrap();
        assert_eq!(mac.to_string(), "52:54:00:11:22:33");
    }

    #[test]
    fn missing_interface_yields_none() {
        let xml = "<domain><name>headless</name><devices/></domain>";
        assert!(mac_from_domain_xml(xml).is_none());
    }

    #[test]
    fn malformed_mac_yields_none() {
        let xml = r#"<domain><devices><interface><mac address="not-a-mac"/></interface></devices></domain>"#;
        assert!(mac_from_domain_xml(xml).is_none());
    }
}
