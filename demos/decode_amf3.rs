use std::io;

fn main() {
    env_logger::init();
    let mut input = io::stdin();
    let value = amf3::Value::read_from(&mut input).unwrap();
    println!("VALUE: {:?}", value);
}
