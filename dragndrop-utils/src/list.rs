use dragndrop::VirtualVolume;

pub fn print(volume: &VirtualVolume) {
    for (_, entry) in volume.files() {
        let attrs = entry.attributes;
        print!("{}", if attrs.directory() { "d" } else { "-" });
        print!("{}", if attrs.read_only() { "r" } else { "-" });
        print!("{}", if attrs.system() { "s" } else { "-" });
        print!("{}", if attrs.hidden() { "h" } else { "-" });
        print!("{}", if attrs.archive() { "a" } else { "-" });
        print!(" {:8}", entry.size);
        match entry.modified() {
            Some(modified) => print!(" {}", modified.format("%Y-%m-%d %H:%M:%S")),
            None => print!(" {:19}", ""),
        }
        println!(" {}", entry.name);
    }
}
