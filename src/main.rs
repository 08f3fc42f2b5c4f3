fn main() {
    focus_flow_lib::run()
}
